//! Applicant sync to the customer-data platform.

use super::{build_http_client, status_error, transport_error, trim_base_url};
use crate::payload::FormResponse;
use crate::sinks::{CdpSync, CdpSyncOutcome, ContactSummary, SinkError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};

const SERVICE: &str = "cdp";

/// CDP API settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpClientConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub timeout_seconds: u64,
}

impl Default for CdpClientConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: String::new(),
            api_key: String::new(),
            timeout_seconds: 10,
        }
    }
}

impl std::fmt::Debug for CdpClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpClientConfig")
            .field("enabled", &self.enabled)
            .field("base_url", &self.base_url)
            .field("api_key", &"<REDACTED>")
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncApplicantRequest<'a> {
    email: &'a str,
    full_name: Option<&'a str>,
    position_preference: Option<&'a [String]>,
    list_item_id: &'a str,
    form_id: &'a str,
    response_token: &'a str,
    submitted_at: Option<&'a str>,
    hidden_fields: &'a HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncApplicantResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    applicant_id: Option<String>,
    #[serde(default)]
    flows_triggered: Option<Vec<String>>,
}

/// [`CdpSync`] that posts to `{base_url}/applicants`.
pub struct HttpCdpClient {
    client: reqwest::Client,
    config: CdpClientConfig,
}

impl HttpCdpClient {
    /// # Errors
    /// Returns [`SinkError::NotConfigured`] without a base URL or API key.
    pub fn new(config: CdpClientConfig) -> Result<Self, SinkError> {
        if config.base_url.trim().is_empty() || config.api_key.trim().is_empty() {
            return Err(SinkError::NotConfigured {
                service: SERVICE.to_string(),
            });
        }

        let client = build_http_client(SERVICE, Duration::from_secs(config.timeout_seconds))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl CdpSync for HttpCdpClient {
    #[instrument(skip(self, response, contact), fields(token = %response.token))]
    async fn sync_applicant(
        &self,
        response: &FormResponse,
        list_item_id: &str,
        contact: &ContactSummary,
    ) -> Result<CdpSyncOutcome, SinkError> {
        let request = SyncApplicantRequest {
            email: &contact.email,
            full_name: contact.full_name.as_deref(),
            position_preference: contact.position_preference.as_deref(),
            list_item_id,
            form_id: &response.form_id,
            response_token: &response.token,
            submitted_at: response.submitted_at.as_deref(),
            hidden_fields: &response.hidden,
        };

        let http_response = self
            .client
            .post(format!("{}/applicants", trim_base_url(&self.config.base_url)))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;

        if !http_response.status().is_success() {
            return Err(status_error(SERVICE, http_response).await);
        }

        let bytes = http_response
            .bytes()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        let body: SyncApplicantResponse = if bytes.is_empty() {
            SyncApplicantResponse::default()
        } else {
            serde_json::from_slice(&bytes).map_err(|e| SinkError::Decode {
                service: SERVICE.to_string(),
                message: e.to_string(),
            })?
        };

        let outcome = CdpSyncOutcome {
            success: body.success.unwrap_or(true),
            applicant_id: body.applicant_id,
            flows_triggered: body.flows_triggered,
        };

        info!(
            applicant_id = outcome.applicant_id.as_deref().unwrap_or(""),
            "Applicant synced to CDP"
        );
        Ok(outcome)
    }
}

impl std::fmt::Debug for HttpCdpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCdpClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "cdp_client_tests.rs"]
mod tests;
