//! Configuration types for the HTTP service
//!
//! Sources are layered, later ones overriding earlier ones:
//!
//! 1. `/etc/form-intake/service.yaml`
//! 2. `config/service.yaml`
//! 3. the file named by `FI_CONFIG_FILE` (required when the variable is set)
//! 4. environment variables prefixed `FI__`, e.g. `FI__INTAKE__LIST_ID`
//!
//! Every field carries a serde default, so an unconfigured environment still
//! produces a usable configuration.

use crate::errors::ConfigError;
use axum::http::HeaderName;
use form_intake_core::adapters::{CdpClientConfig, EmailSenderConfig, GraphListStoreConfig};
use form_intake_core::{AttributionKeys, DispatchMode, PipelineSettings, WebhookSecret};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_FILE_ENV: &str = "FI_CONFIG_FILE";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "FI";

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Inbound webhook settings
    pub webhook: WebhookConfig,

    /// Pipeline settings
    pub intake: IntakeConfig,

    /// Graph list store
    pub list_store: GraphListStoreConfig,

    /// Confirmation email API
    pub email: EmailSenderConfig,

    /// Customer-data platform
    pub cdp: CdpClientConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load from the standard sources, honouring `FI_CONFIG_FILE`.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var(CONFIG_FILE_ENV)
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(explicit.as_deref())
    }

    /// Load from the standard sources plus an optional explicit file.
    ///
    /// # Errors
    /// A missing explicit file, a malformed file, or an environment value
    /// that cannot be coerced to its field type.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("/etc/form-intake/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name("config/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        if let Some(path) = explicit {
            builder = builder.add_source(
                config::File::from(path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }

        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Check the settings the HTTP layer depends on.
    ///
    /// A missing list id is deliberately not an error here; each delivery
    /// reports it as a server misconfiguration instead.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid {
                message: "server.port must be non-zero".to_string(),
            });
        }

        if self.server.max_body_size == 0 {
            return Err(ConfigError::Invalid {
                message: "server.max_body_size must be non-zero".to_string(),
            });
        }

        let path = &self.webhook.endpoint_path;
        if !path.starts_with('/') || path.len() < 2 {
            return Err(ConfigError::Invalid {
                message: format!("webhook.endpoint_path '{}' must start with '/'", path),
            });
        }
        if RESERVED_PATHS.contains(&path.as_str()) {
            return Err(ConfigError::Invalid {
                message: format!("webhook.endpoint_path '{}' is reserved", path),
            });
        }

        if HeaderName::from_bytes(self.webhook.signature_header.as_bytes()).is_err() {
            return Err(ConfigError::Invalid {
                message: format!(
                    "webhook.signature_header '{}' is not a valid header name",
                    self.webhook.signature_header
                ),
            });
        }

        Ok(())
    }
}

/// Routes owned by the service itself.
const RESERVED_PATHS: [&str; 2] = ["/health", "/metrics"];

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,

    /// Enable CORS
    pub enable_cors: bool,

    /// Enable compression
    pub enable_compression: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            max_body_size: 1024 * 1024, // 1MB
            enable_cors: false,
            enable_compression: true,
        }
    }
}

/// Inbound webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Webhook endpoint path
    pub endpoint_path: String,

    /// Header carrying `sha256=<base64>`
    pub signature_header: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            endpoint_path: "/webhooks/typeform".to_string(),
            signature_header: "typeform-signature".to_string(),
        }
    }
}

/// Pipeline configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Shared secret; unset disables signature verification
    pub webhook_secret: Option<String>,

    /// Only this form is accepted, when set
    pub expected_form_id: Option<String>,

    /// Target list; unset fails every delivery with 500
    pub list_id: Option<String>,

    /// Copy attribution values into the list item
    pub forward_attribution: bool,

    /// List-field names for forwarded attribution
    pub attribution_keys: AttributionKeys,

    pub dispatch_mode: DispatchMode,

    /// YAML question-to-field mapping table
    pub mapping_file: PathBuf,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            expected_form_id: None,
            list_id: None,
            forward_attribution: false,
            attribution_keys: AttributionKeys::default(),
            dispatch_mode: DispatchMode::default(),
            mapping_file: PathBuf::from("config/field-mapping.yaml"),
        }
    }
}

impl std::fmt::Debug for IntakeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakeConfig")
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "<REDACTED>"),
            )
            .field("expected_form_id", &self.expected_form_id)
            .field("list_id", &self.list_id)
            .field("forward_attribution", &self.forward_attribution)
            .field("attribution_keys", &self.attribution_keys)
            .field("dispatch_mode", &self.dispatch_mode)
            .field("mapping_file", &self.mapping_file)
            .finish()
    }
}

impl IntakeConfig {
    /// Settings for [`form_intake_core::IntakePipeline::new`].
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            webhook_secret: WebhookSecret::from_optional(self.webhook_secret.clone()),
            expected_form_id: self.expected_form_id.clone(),
            list_id: self.list_id.clone(),
            forward_attribution: self.forward_attribution,
            attribution_keys: self.attribution_keys.clone(),
            dispatch_mode: self.dispatch_mode,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
