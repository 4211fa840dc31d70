//! Collaborator traits for downstream side effects.
//!
//! The pipeline reaches the outside world only through these three traits.
//! Production implementations live in [`adapters`](crate::adapters); tests
//! substitute fakes. An [`IntakeSinks`] value bundles one of each and is
//! passed explicitly to the pipeline; there is no global default set.

use crate::mapping::ListFields;
use crate::payload::FormResponse;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Data passed to sinks
// ============================================================================

/// Item created in the list store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub id: String,
}

/// Input for the confirmation email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationEmail {
    pub email: String,
    pub full_name: Option<String>,
    pub position_preference: Option<Vec<String>>,
    /// Submission time from the form response, as sent by the provider.
    pub submitted_at: Option<String>,
    pub form_id: String,
    pub form_title: Option<String>,
}

/// Contact details summarised for the CDP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSummary {
    pub email: String,
    pub full_name: Option<String>,
    pub position_preference: Option<Vec<String>>,
}

/// What the CDP reported after a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpSyncOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applicant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flows_triggered: Option<Vec<String>>,
}

// ============================================================================
// Errors
// ============================================================================

/// Failure reported by a downstream sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("{service} request failed: {message}")]
    Transport { service: String, message: String },

    #[error("{service} returned HTTP {status}: {message}")]
    Status {
        service: String,
        status: u16,
        message: String,
    },

    #[error("{service} response could not be decoded: {message}")]
    Decode { service: String, message: String },

    #[error("{service} authentication failed: {message}")]
    Authentication { service: String, message: String },

    #[error("{service} is not configured")]
    NotConfigured { service: String },

    #[error("{service} template is invalid: {message}")]
    Template { service: String, message: String },
}

impl SinkError {
    /// Name of the sink that failed.
    pub fn service(&self) -> &str {
        match self {
            Self::Transport { service, .. }
            | Self::Status { service, .. }
            | Self::Decode { service, .. }
            | Self::Authentication { service, .. }
            | Self::NotConfigured { service }
            | Self::Template { service, .. } => service,
        }
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode { .. }
            | Self::Authentication { .. }
            | Self::NotConfigured { .. }
            | Self::Template { .. } => false,
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Structured record store that persists mapped submissions. Required sink.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Create an item in `list_id` and return its identifier.
    async fn create_list_item(&self, list_id: &str, fields: &ListFields)
        -> Result<ListItem, SinkError>;
}

/// Sends the applicant confirmation email. Best effort.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send the email. Delivery failure should be reported as `Ok(false)`;
    /// callers still treat `Err` and panics as a failed send.
    async fn send_confirmation_email(&self, email: &ConfirmationEmail) -> Result<bool, SinkError>;
}

/// Syncs an applicant to the customer-data platform. Best effort.
#[async_trait]
pub trait CdpSync: Send + Sync {
    /// Sync the original response, correlated with the list item it produced.
    async fn sync_applicant(
        &self,
        response: &FormResponse,
        list_item_id: &str,
        contact: &ContactSummary,
    ) -> Result<CdpSyncOutcome, SinkError>;
}

/// The capability set the dispatcher works with.
#[derive(Clone)]
pub struct IntakeSinks {
    pub list_store: Arc<dyn ListStore>,
    pub email_sender: Arc<dyn EmailSender>,
    pub cdp_sync: Arc<dyn CdpSync>,
}

impl IntakeSinks {
    pub fn new(
        list_store: Arc<dyn ListStore>,
        email_sender: Arc<dyn EmailSender>,
        cdp_sync: Arc<dyn CdpSync>,
    ) -> Self {
        Self {
            list_store,
            email_sender,
            cdp_sync,
        }
    }
}

impl std::fmt::Debug for IntakeSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakeSinks").finish_non_exhaustive()
    }
}

// ============================================================================
// Disabled sinks
// ============================================================================

/// List store used when no list-store credentials are configured. Every
/// write fails, so each delivery is answered with a server error.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredListStore;

#[async_trait]
impl ListStore for UnconfiguredListStore {
    async fn create_list_item(
        &self,
        _list_id: &str,
        _fields: &ListFields,
    ) -> Result<ListItem, SinkError> {
        Err(SinkError::NotConfigured {
            service: "graph".to_string(),
        })
    }
}

/// Email sender used when email is switched off. Never sends.
#[derive(Debug, Clone, Default)]
pub struct DisabledEmailSender;

#[async_trait]
impl EmailSender for DisabledEmailSender {
    async fn send_confirmation_email(&self, _email: &ConfirmationEmail) -> Result<bool, SinkError> {
        Ok(false)
    }
}

/// CDP sync used when the CDP is switched off. Always reports not configured.
#[derive(Debug, Clone, Default)]
pub struct DisabledCdpSync;

#[async_trait]
impl CdpSync for DisabledCdpSync {
    async fn sync_applicant(
        &self,
        _response: &FormResponse,
        _list_item_id: &str,
        _contact: &ContactSummary,
    ) -> Result<CdpSyncOutcome, SinkError> {
        Err(SinkError::NotConfigured {
            service: "cdp".to_string(),
        })
    }
}

#[cfg(test)]
#[path = "sinks_tests.rs"]
mod tests;
