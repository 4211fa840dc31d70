//! Fan-out of a mapped submission to the downstream sinks.
//!
//! The list-store write is the source of truth: it runs first, and its
//! failure is the only one that fails the delivery. The confirmation email
//! and the CDP sync are enrichments. They run only when a contact email was
//! extracted, and each one absorbs its own errors and panics so that a
//! secondary-system outage never changes the status code returned to the
//! form provider.

use crate::mapping::ListFields;
use crate::payload::FormResponse;
use crate::sinks::{CdpSyncOutcome, ConfirmationEmail, ContactSummary, IntakeSinks, SinkError};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};

/// How the optional sinks run relative to each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Email first, then CDP sync.
    Sequential,
    /// Email and CDP sync joined; each settles independently.
    #[default]
    Concurrent,
}

/// What the fan-out achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub list_item_id: String,
    pub email_sent: bool,
    /// `None` when the sync was skipped or failed.
    pub cdp_sync: Option<CdpSyncOutcome>,
}

/// The required list-store write failed.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("List store write failed: {0}")]
    ListStore(#[source] SinkError),
}

/// Runs the list-store write and the optional sinks in order.
#[derive(Debug, Clone)]
pub struct FanOutDispatcher {
    sinks: IntakeSinks,
    mode: DispatchMode,
}

impl FanOutDispatcher {
    pub fn new(sinks: IntakeSinks, mode: DispatchMode) -> Self {
        Self { sinks, mode }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Record the submission and run the optional sinks.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ListStore`] when the list-store write fails.
    /// No optional sink runs in that case.
    pub async fn dispatch(
        &self,
        list_id: &str,
        fields: &ListFields,
        response: &FormResponse,
        contact: Option<&ContactSummary>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let item = self
            .sinks
            .list_store
            .create_list_item(list_id, fields)
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    form_id = %response.form_id,
                    token = %response.token,
                    "List store write failed"
                );
                DispatchError::ListStore(e)
            })?;

        info!(list_item_id = %item.id, "List item created");

        let Some(contact) = contact else {
            debug!("No contact email extracted - skipping confirmation email and CDP sync");
            return Ok(DispatchOutcome {
                list_item_id: item.id,
                email_sent: false,
                cdp_sync: None,
            });
        };

        let (email_sent, cdp_sync) = match self.mode {
            DispatchMode::Sequential => {
                let email_sent = self.send_confirmation(response, contact).await;
                let cdp_sync = self.sync_cdp(response, &item.id, contact).await;
                (email_sent, cdp_sync)
            }
            DispatchMode::Concurrent => {
                tokio::join!(
                    self.send_confirmation(response, contact),
                    self.sync_cdp(response, &item.id, contact)
                )
            }
        };

        Ok(DispatchOutcome {
            list_item_id: item.id,
            email_sent,
            cdp_sync,
        })
    }

    async fn send_confirmation(&self, response: &FormResponse, contact: &ContactSummary) -> bool {
        let email = ConfirmationEmail {
            email: contact.email.clone(),
            full_name: contact.full_name.clone(),
            position_preference: contact.position_preference.clone(),
            submitted_at: response.submitted_at.clone(),
            form_id: response.form_id.clone(),
            form_title: response.form_title().map(String::from),
        };
        let sender = &self.sinks.email_sender;

        let result = AssertUnwindSafe(async { sender.send_confirmation_email(&email).await })
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(true)) => {
                info!("Confirmation email sent");
                true
            }
            Ok(Ok(false)) => {
                warn!("Confirmation email was not sent");
                false
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Confirmation email failed (non-fatal)");
                false
            }
            Err(_) => {
                error!("Email sender panicked (non-fatal)");
                false
            }
        }
    }

    async fn sync_cdp(
        &self,
        response: &FormResponse,
        list_item_id: &str,
        contact: &ContactSummary,
    ) -> Option<CdpSyncOutcome> {
        let cdp = &self.sinks.cdp_sync;

        let result =
            AssertUnwindSafe(async { cdp.sync_applicant(response, list_item_id, contact).await })
                .catch_unwind()
                .await;

        match result {
            Ok(Ok(outcome)) => {
                if outcome.success {
                    info!(
                        applicant_id = outcome.applicant_id.as_deref().unwrap_or(""),
                        "CDP sync completed"
                    );
                } else {
                    warn!("CDP reported an unsuccessful sync");
                }
                Some(outcome)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "CDP sync failed (non-fatal)");
                None
            }
            Err(_) => {
                error!("CDP sync panicked (non-fatal)");
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
