//! List store backed by Microsoft Graph list items.
//!
//! Authenticates with the OAuth2 client-credentials flow and caches the
//! access token until shortly before it expires.

use super::{build_http_client, status_error, transport_error, trim_base_url};
use crate::mapping::ListFields;
use crate::sinks::{ListItem, ListStore, SinkError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeroize::Zeroizing;

const SERVICE: &str = "graph";

/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Graph list store settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphListStoreConfig {
    /// Identity authority, without the tenant segment
    pub authority: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// SharePoint site that owns the list
    pub site_id: String,
    pub graph_base_url: String,
    pub scope: String,
    pub timeout_seconds: u64,
}

impl Default for GraphListStoreConfig {
    fn default() -> Self {
        Self {
            authority: "https://login.microsoftonline.com".to_string(),
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            site_id: String::new(),
            graph_base_url: "https://graph.microsoft.com/v1.0".to_string(),
            scope: "https://graph.microsoft.com/.default".to_string(),
            timeout_seconds: 10,
        }
    }
}

impl std::fmt::Debug for GraphListStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphListStoreConfig")
            .field("authority", &self.authority)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<REDACTED>")
            .field("site_id", &self.site_id)
            .field("graph_base_url", &self.graph_base_url)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl GraphListStoreConfig {
    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            trim_base_url(&self.authority),
            self.tenant_id
        )
    }

    fn items_url(&self, list_id: &str) -> String {
        format!(
            "{}/sites/{}/lists/{}/items",
            trim_base_url(&self.graph_base_url),
            self.site_id,
            list_id
        )
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: Zeroizing<String>,
    refresh_at: Instant,
}

#[derive(Serialize)]
struct CreateItemRequest<'a> {
    fields: &'a ListFields,
}

#[derive(Deserialize)]
struct CreateItemResponse {
    id: String,
}

/// [`ListStore`] that creates Graph list items.
pub struct GraphListStore {
    client: reqwest::Client,
    config: GraphListStoreConfig,
    token: Mutex<Option<CachedToken>>,
}

impl GraphListStore {
    /// Build the store.
    ///
    /// # Errors
    /// Returns [`SinkError::NotConfigured`] when the credentials or site are
    /// missing, or [`SinkError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: GraphListStoreConfig) -> Result<Self, SinkError> {
        let required = [
            &config.tenant_id,
            &config.client_id,
            &config.client_secret,
            &config.site_id,
        ];
        if required.iter().any(|value| value.trim().is_empty()) {
            return Err(SinkError::NotConfigured {
                service: SERVICE.to_string(),
            });
        }

        let client = build_http_client(SERVICE, Duration::from_secs(config.timeout_seconds))?;

        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    /// Return a cached token or fetch a fresh one.
    #[instrument(skip(self))]
    async fn access_token(&self) -> Result<Zeroizing<String>, SinkError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        debug!(tenant_id = %self.config.tenant_id, "Requesting Graph access token");

        let response = self
            .client
            .post(self.config.token_url())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("scope", self.config.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;

        if !response.status().is_success() {
            let err = status_error(SERVICE, response).await;
            return Err(SinkError::Authentication {
                service: SERVICE.to_string(),
                message: err.to_string(),
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| SinkError::Decode {
            service: SERVICE.to_string(),
            message: e.to_string(),
        })?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        let value = Zeroizing::new(token.access_token);
        *cached = Some(CachedToken {
            value: value.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(value)
    }
}

#[async_trait]
impl ListStore for GraphListStore {
    #[instrument(skip(self, fields), fields(field_count = fields.len()))]
    async fn create_list_item(
        &self,
        list_id: &str,
        fields: &ListFields,
    ) -> Result<ListItem, SinkError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .post(self.config.items_url(list_id))
            .bearer_auth(token.as_str())
            .json(&CreateItemRequest { fields })
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(status_error(SERVICE, response).await);
        }

        let created: CreateItemResponse = response.json().await.map_err(|e| SinkError::Decode {
            service: SERVICE.to_string(),
            message: e.to_string(),
        })?;

        info!(list_item_id = %created.id, "Graph list item created");
        Ok(ListItem { id: created.id })
    }
}

impl std::fmt::Debug for GraphListStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphListStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "graph_list_store_tests.rs"]
mod tests;
