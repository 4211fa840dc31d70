//! End-to-end intake pipeline.
//!
//! [`IntakePipeline::handle`] takes one [`WebhookDelivery`] through signature
//! verification, parsing, form and configuration checks, mapping, attribution
//! forwarding and fan-out, and always produces a [`WebhookResult`]. Checks run
//! in a fixed order and the first failure wins; nothing is written downstream
//! until every check has passed.

use crate::dispatch::{DispatchMode, FanOutDispatcher};
use crate::mapping::{apply_attribution, AttributionKeys, FieldMapper};
use crate::payload::{parse_delivery, ParsedDelivery, WebhookDelivery};
use crate::result::{IntakeError, WebhookResult};
use crate::signature::{SignatureVerifier, WebhookSecret};
use crate::sinks::{ContactSummary, IntakeSinks};
use crate::ErrorCategory;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn, Span};

/// Static settings for one pipeline instance.
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    /// Shared secret for signature verification. `None` disables it.
    pub webhook_secret: Option<WebhookSecret>,
    /// Only deliveries for this form are accepted, when set.
    pub expected_form_id: Option<String>,
    /// Target list in the list store.
    pub list_id: Option<String>,
    pub forward_attribution: bool,
    pub attribution_keys: AttributionKeys,
    pub dispatch_mode: DispatchMode,
}

/// Processes webhook deliveries against an injected set of sinks.
#[derive(Clone)]
pub struct IntakePipeline {
    verifier: SignatureVerifier,
    expected_form_id: Option<String>,
    list_id: Option<String>,
    forward_attribution: bool,
    attribution_keys: AttributionKeys,
    mapper: Arc<dyn FieldMapper>,
    dispatcher: FanOutDispatcher,
}

impl IntakePipeline {
    pub fn new(settings: PipelineSettings, mapper: Arc<dyn FieldMapper>, sinks: IntakeSinks) -> Self {
        let blank_to_none = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        Self {
            verifier: SignatureVerifier::new(settings.webhook_secret),
            expected_form_id: blank_to_none(settings.expected_form_id),
            list_id: blank_to_none(settings.list_id),
            forward_attribution: settings.forward_attribution,
            attribution_keys: settings.attribution_keys,
            mapper,
            dispatcher: FanOutDispatcher::new(sinks, settings.dispatch_mode),
        }
    }

    /// Whether deliveries must carry a valid signature.
    pub fn verifies_signatures(&self) -> bool {
        self.verifier.is_enabled()
    }

    /// Process one delivery.
    ///
    /// Never fails: every terminal error is converted into its status code and
    /// fixed response body, with the detail logged.
    #[instrument(
        name = "webhook_intake",
        skip(self, delivery),
        fields(
            correlation_id = %delivery.correlation_id,
            form_id = tracing::field::Empty,
            token = tracing::field::Empty,
        )
    )]
    pub async fn handle(&self, delivery: &WebhookDelivery) -> WebhookResult {
        let result = match self.process(delivery).await {
            Ok(result) => result,
            Err(err) => {
                match err.error_category() {
                    ErrorCategory::Configuration | ErrorCategory::Transient => {
                        error!(
                            error = %err,
                            category = %err.error_category(),
                            status = err.status_code(),
                            "Webhook intake failed"
                        );
                    }
                    ErrorCategory::Security | ErrorCategory::Permanent => {
                        warn!(
                            error = %err,
                            category = %err.error_category(),
                            status = err.status_code(),
                            "Webhook delivery rejected"
                        );
                    }
                }
                WebhookResult::from_error(&err)
            }
        };

        result.with_correlation_id(delivery.correlation_id)
    }

    async fn process(&self, delivery: &WebhookDelivery) -> Result<WebhookResult, IntakeError> {
        if !self.verifier.verify(&delivery.body, delivery.signature()) {
            return Err(IntakeError::InvalidSignature);
        }

        let ParsedDelivery {
            event_id,
            event_type,
            form_response,
            attribution,
        } = parse_delivery(&delivery.body)?;

        let span = Span::current();
        span.record("form_id", form_response.form_id.as_str());
        span.record("token", form_response.token.as_str());
        debug!(
            event_id = event_id.as_deref().unwrap_or(""),
            event_type = event_type.as_deref().unwrap_or(""),
            answers = form_response.answers.len(),
            "Delivery parsed"
        );

        if let Some(expected) = &self.expected_form_id {
            if form_response.form_id != *expected {
                return Err(IntakeError::UnexpectedForm {
                    expected: expected.clone(),
                    actual: form_response.form_id.clone(),
                });
            }
        }

        let list_id = self
            .list_id
            .as_deref()
            .ok_or(IntakeError::ListNotConfigured)?;

        let mut mapping = self.mapper.map(&form_response);
        if !mapping.is_valid() {
            return Err(IntakeError::MissingRequiredFields(mapping.missing_required));
        }
        if !mapping.unmapped_refs.is_empty() {
            debug!(unmapped = ?mapping.unmapped_refs, "Answers without a mapping rule");
        }

        let skipped_attribution = if self.forward_attribution && !attribution.is_empty() {
            apply_attribution(&mut mapping.fields, &attribution, &self.attribution_keys)
        } else {
            Vec::new()
        };

        let contact = mapping.email.clone().map(|email| ContactSummary {
            email,
            full_name: mapping.full_name.clone(),
            position_preference: mapping.position_preference.clone(),
        });

        let outcome = self
            .dispatcher
            .dispatch(list_id, &mapping.fields, &form_response, contact.as_ref())
            .await?;

        info!(
            list_item_id = %outcome.list_item_id,
            email_sent = outcome.email_sent,
            cdp_synced = outcome.cdp_sync.as_ref().is_some_and(|c| c.success),
            attribution_skipped = ?skipped_attribution,
            "Submission recorded"
        );

        Ok(WebhookResult::success(
            outcome,
            mapping.unmapped_refs,
            Some(attribution),
        ))
    }
}

impl std::fmt::Debug for IntakePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakePipeline")
            .field("verifier", &self.verifier)
            .field("expected_form_id", &self.expected_form_id)
            .field("list_id", &self.list_id)
            .field("forward_attribution", &self.forward_attribution)
            .field("dispatch_mode", &self.dispatcher.mode())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
