//! Terminal errors and response composition.
//!
//! Every delivery ends as a [`WebhookResult`]: an HTTP status plus a JSON
//! body. Failures carry a fixed public message; the detail behind them is
//! only ever logged.

use crate::dispatch::{DispatchError, DispatchOutcome};
use crate::payload::{Attribution, PayloadError};
use crate::sinks::{CdpSyncOutcome, SinkError};
use crate::{CorrelationId, ErrorCategory};
use serde::{Deserialize, Serialize};

/// Terminal failure of the intake pipeline.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("Body is not valid JSON: {message}")]
    MalformedPayload { message: String },

    #[error("Body has no form_response object")]
    MissingFormResponse,

    #[error("form_response could not be decoded: {message}")]
    InvalidFormResponse { message: String },

    #[error("Form '{actual}' does not match expected form '{expected}'")]
    UnexpectedForm { expected: String, actual: String },

    #[error("No list id configured")]
    ListNotConfigured,

    #[error("Missing required fields: {}", .0.join(", "))]
    MissingRequiredFields(Vec<String>),

    #[error("List store write failed: {0}")]
    ListStoreWrite(#[source] SinkError),
}

impl IntakeError {
    /// HTTP status returned to the form provider.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidSignature => 401,
            Self::MalformedPayload { .. }
            | Self::MissingFormResponse
            | Self::InvalidFormResponse { .. }
            | Self::MissingRequiredFields(_) => 400,
            Self::UnexpectedForm { .. } => 403,
            Self::ListNotConfigured | Self::ListStoreWrite(_) => 500,
        }
    }

    /// Fixed message placed in the response body.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidSignature => "Invalid signature",
            Self::MalformedPayload { .. } => "Invalid JSON payload",
            Self::MissingFormResponse => "Missing form_response",
            Self::InvalidFormResponse { .. } => "Invalid form_response",
            Self::UnexpectedForm { .. } => "Unexpected form",
            Self::ListNotConfigured => "Server misconfiguration",
            Self::MissingRequiredFields(_) => "Missing required fields",
            Self::ListStoreWrite(_) => "Failed to record submission",
        }
    }

    /// Get error category for logging
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::InvalidSignature => ErrorCategory::Security,
            Self::MalformedPayload { .. }
            | Self::MissingFormResponse
            | Self::InvalidFormResponse { .. }
            | Self::UnexpectedForm { .. }
            | Self::MissingRequiredFields(_) => ErrorCategory::Permanent,
            Self::ListNotConfigured => ErrorCategory::Configuration,
            Self::ListStoreWrite(e) if e.is_transient() => ErrorCategory::Transient,
            // Rejected credentials or list ids will not recover on redelivery.
            Self::ListStoreWrite(_) => ErrorCategory::Configuration,
        }
    }
}

impl From<PayloadError> for IntakeError {
    fn from(err: PayloadError) -> Self {
        match err {
            PayloadError::Malformed(e) => Self::MalformedPayload {
                message: e.to_string(),
            },
            PayloadError::MissingFormResponse => Self::MissingFormResponse,
            PayloadError::InvalidFormResponse(e) => Self::InvalidFormResponse {
                message: e.to_string(),
            },
        }
    }
}

impl From<DispatchError> for IntakeError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::ListStore(e) => Self::ListStoreWrite(e),
        }
    }
}

/// JSON body returned to the form provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponseBody {
    pub success: bool,

    #[serde(
        rename = "sharePointItemId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub list_item_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_sent: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdp_sync: Option<CdpSyncOutcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unmapped_refs: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<Attribution>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<String>>,
}

/// Final outcome of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResult {
    pub status: u16,
    pub body: WebhookResponseBody,
    /// Set by the pipeline to the delivery's correlation id.
    pub correlation_id: Option<CorrelationId>,
}

impl WebhookResult {
    /// Compose the response for a terminal failure.
    pub fn from_error(err: &IntakeError) -> Self {
        let missing = match err {
            IntakeError::MissingRequiredFields(fields) => Some(fields.clone()),
            _ => None,
        };

        Self {
            status: err.status_code(),
            body: WebhookResponseBody {
                success: false,
                error: Some(err.public_message().to_string()),
                missing,
                ..Default::default()
            },
            correlation_id: None,
        }
    }

    /// Compose the 200 response for a recorded submission.
    ///
    /// Empty diagnostics are left out of the body.
    pub fn success(
        outcome: DispatchOutcome,
        unmapped_refs: Vec<String>,
        attribution: Option<Attribution>,
    ) -> Self {
        Self {
            status: 200,
            body: WebhookResponseBody {
                success: true,
                list_item_id: Some(outcome.list_item_id),
                email_sent: Some(outcome.email_sent),
                cdp_sync: outcome.cdp_sync,
                unmapped_refs: (!unmapped_refs.is_empty()).then_some(unmapped_refs),
                attribution: attribution.filter(|a| !a.is_empty()),
                ..Default::default()
            },
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn is_success(&self) -> bool {
        self.body.success
    }
}

#[cfg(test)]
#[path = "result_tests.rs"]
mod tests;
