//! Metrics collection for the API service.
//!
//! Each [`ServiceMetrics`] owns its own registry, so several routers (one per
//! test, for instance) can coexist in one process.

use form_intake_core::WebhookResult;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Service metrics for observability
#[derive(Debug)]
pub struct ServiceMetrics {
    registry: Registry,

    pub webhook_requests_total: IntCounter,
    pub webhook_responses_total: IntCounterVec,
    pub webhook_duration_seconds: Histogram,
    pub signature_rejections_total: IntCounter,

    // Optional sink degradations
    pub email_not_sent_total: IntCounter,
    pub cdp_sync_failures_total: IntCounter,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let webhook_requests_total = IntCounter::new(
            "form_intake_webhook_requests_total",
            "Total webhook deliveries received",
        )?;
        let webhook_responses_total = IntCounterVec::new(
            Opts::new(
                "form_intake_webhook_responses_total",
                "Webhook responses by HTTP status",
            ),
            &["status"],
        )?;
        let webhook_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "form_intake_webhook_duration_seconds",
                "Webhook processing time distribution",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        )?;
        let signature_rejections_total = IntCounter::new(
            "form_intake_signature_rejections_total",
            "Deliveries rejected for a missing or invalid signature",
        )?;
        let email_not_sent_total = IntCounter::new(
            "form_intake_email_not_sent_total",
            "Recorded submissions whose confirmation email was not sent",
        )?;
        let cdp_sync_failures_total = IntCounter::new(
            "form_intake_cdp_sync_failures_total",
            "Recorded submissions whose CDP sync failed or was skipped",
        )?;

        registry.register(Box::new(webhook_requests_total.clone()))?;
        registry.register(Box::new(webhook_responses_total.clone()))?;
        registry.register(Box::new(webhook_duration_seconds.clone()))?;
        registry.register(Box::new(signature_rejections_total.clone()))?;
        registry.register(Box::new(email_not_sent_total.clone()))?;
        registry.register(Box::new(cdp_sync_failures_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            webhook_requests_total,
            webhook_responses_total,
            webhook_duration_seconds,
            signature_rejections_total,
            email_not_sent_total,
            cdp_sync_failures_total,
        }))
    }

    /// Record the outcome of one delivery.
    pub fn record_result(&self, result: &WebhookResult, elapsed: Duration) {
        self.webhook_duration_seconds.observe(elapsed.as_secs_f64());
        self.webhook_responses_total
            .with_label_values(&[result.status.to_string().as_str()])
            .inc();

        if result.status == 401 {
            self.signature_rejections_total.inc();
        }

        if result.is_success() {
            if result.body.email_sent == Some(false) {
                self.email_not_sent_total.inc();
            }
            if !result.body.cdp_sync.as_ref().is_some_and(|c| c.success) {
                self.cdp_sync_failures_total.inc();
            }
        }
    }

    /// Render every metric in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
