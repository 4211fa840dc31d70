//! # Form Intake Core
//!
//! Core business logic for the form intake service.
//!
//! This crate turns an inbound form-provider webhook delivery into a recorded
//! list item, a confirmation email and a customer-data-platform sync.
//!
//! ## Architecture
//!
//! The pipeline runs five stages in order, each of which may stop processing
//! with a terminal [`result::IntakeError`]:
//!
//! 1. [`signature`] - HMAC-SHA256 verification over the exact received bytes
//! 2. [`payload`] - strict JSON parsing and attribution extraction
//! 3. [`mapping`] - question-to-field mapping and required field checks
//! 4. [`dispatch`] - fan-out to the list store, email sender and CDP
//! 5. [`result`] - status code and response body composition
//!
//! Downstream systems are reached only through the traits in [`sinks`];
//! HTTP implementations live in [`adapters`] and are injected at startup.
//!
//! ## Usage
//!
//! ```rust
//! use form_intake_core::signature::{sign_payload, verify_signature, WebhookSecret};
//!
//! let secret = WebhookSecret::new("shhh");
//! let body = br#"{"form_response":{}}"#;
//! let header = sign_payload(body, &secret).expect("HMAC accepts any key length");
//! assert!(verify_signature(body, Some(&header), Some(&secret)));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use uuid::Uuid;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Identifier for tracing one webhook invocation across log lines and
/// downstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get string representation
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse::<Uuid>()?))
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for logging and alerting decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Temporary failures of a downstream system
    Transient,
    /// Bad input that will not succeed on redelivery
    Permanent,
    /// Authentication failures
    Security,
    /// Server misconfiguration that needs an operator
    Configuration,
}

impl ErrorCategory {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Security => "security",
            Self::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Downstream HTTP adapters (list store, email, CDP)
pub mod adapters;

/// Fan-out of a mapped submission to the downstream sinks
pub mod dispatch;

/// Question-to-field mapping and attribution forwarding
pub mod mapping;

/// Webhook body parsing
pub mod payload;

/// End-to-end intake pipeline
pub mod pipeline;

/// Terminal errors and response composition
pub mod result;

/// HMAC signature verification
pub mod signature;

/// Collaborator traits for downstream side effects
pub mod sinks;

// Re-export key types for convenience
pub use dispatch::{DispatchError, DispatchMode, DispatchOutcome, FanOutDispatcher};
pub use mapping::{
    apply_attribution, AttributionKeys, ContactRole, FieldMapper, FieldRule, ListFields,
    MappingConfigError, MappingResult, MappingTable, TableFieldMapper,
};
pub use payload::{
    parse_delivery, Answer, AnswerField, AnswerValue, Attribution, AttributionMember, FormResponse,
    ParsedDelivery, PayloadError, WebhookDelivery,
};
pub use pipeline::{IntakePipeline, PipelineSettings};
pub use result::{IntakeError, WebhookResponseBody, WebhookResult};
pub use signature::{sign_payload, verify_signature, SignatureVerifier, WebhookSecret};
pub use sinks::{
    CdpSync, CdpSyncOutcome, ConfirmationEmail, ContactSummary, DisabledCdpSync,
    DisabledEmailSender, EmailSender, IntakeSinks, ListItem, ListStore, SinkError,
    UnconfiguredListStore,
};

#[cfg(test)]
pub(crate) mod test_fakes;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
