//! Confirmation email over a transactional email HTTP API.

use super::{build_http_client, status_error, trim_base_url};
use crate::sinks::{ConfirmationEmail, EmailSender, SinkError};
use async_trait::async_trait;
use chrono::DateTime;
use handlebars::{Handlebars, RenderError, TemplateError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument, warn};

const SERVICE: &str = "email";

const TEMPLATE: &str = "confirmation";

const CONFIRMATION_HTML: &str = concat!(
    "<p>Hi{{#if name}} {{name}}{{/if}},</p>",
    "<p>Thanks for registering{{#if form_title}} for {{form_title}}{{/if}}. ",
    "We have received your submission.</p>",
    "{{#if positions}}<p>Position preferences:</p>",
    "<ul>{{#each positions}}<li>{{this}}</li>{{/each}}</ul>{{/if}}",
    "{{#if submitted_at}}<p>Submitted {{submitted_at}}.</p>{{/if}}",
    "<p>We will be in touch with next steps.</p>",
);

/// Email API settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSenderConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub from: String,
    pub reply_to: Option<String>,
    /// Handlebars template; `name` and `form_title` are available.
    pub subject: String,
    pub timeout_seconds: u64,
}

impl Default for EmailSenderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.resend.com".to_string(),
            api_key: String::new(),
            from: "Tryouts <tryouts@example.com>".to_string(),
            reply_to: None,
            subject: "We received your {{#if form_title}}{{form_title}} {{/if}}registration"
                .to_string(),
            timeout_seconds: 10,
        }
    }
}

impl std::fmt::Debug for EmailSenderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSenderConfig")
            .field("enabled", &self.enabled)
            .field("base_url", &self.base_url)
            .field("api_key", &"<REDACTED>")
            .field("from", &self.from)
            .field("reply_to", &self.reply_to)
            .field("subject", &self.subject)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: String,
    html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

/// [`EmailSender`] that posts to `{base_url}/emails`.
///
/// Delivery problems are reported as `Ok(false)`; this sender never returns
/// `Err` once built.
pub struct HttpEmailSender {
    client: reqwest::Client,
    config: EmailSenderConfig,
    templates: ConfirmationTemplates,
}

impl HttpEmailSender {
    /// # Errors
    /// Returns [`SinkError::NotConfigured`] without an API key and
    /// [`SinkError::Template`] when the subject template does not compile.
    pub fn new(config: EmailSenderConfig) -> Result<Self, SinkError> {
        if config.api_key.trim().is_empty() {
            return Err(SinkError::NotConfigured {
                service: SERVICE.to_string(),
            });
        }

        let templates =
            ConfirmationTemplates::new(&config.subject).map_err(|e| SinkError::Template {
                service: SERVICE.to_string(),
                message: e.to_string(),
            })?;
        let client = build_http_client(SERVICE, Duration::from_secs(config.timeout_seconds))?;
        Ok(Self {
            client,
            config,
            templates,
        })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    #[instrument(skip(self, email), fields(form_id = %email.form_id))]
    async fn send_confirmation_email(&self, email: &ConfirmationEmail) -> Result<bool, SinkError> {
        let (subject, html) = match self.templates.render(email) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(error = %e, "Confirmation email could not be rendered");
                return Ok(false);
            }
        };

        let request = SendEmailRequest {
            from: &self.config.from,
            to: vec![email.email.as_str()],
            subject,
            html,
            reply_to: self.config.reply_to.as_deref(),
        };

        let response = match self
            .client
            .post(format!("{}/emails", trim_base_url(&self.config.base_url)))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Email API request failed");
                return Ok(false);
            }
        };

        if !response.status().is_success() {
            let err = status_error(SERVICE, response).await;
            warn!(error = %err, "Email API rejected the message");
            return Ok(false);
        }

        info!("Confirmation email accepted by email API");
        Ok(true)
    }
}

impl std::fmt::Debug for HttpEmailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmailSender")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Human-readable submission time; unparseable values are shown as sent.
fn format_submitted_at(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.format("%B %-d, %Y at %H:%M UTC").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Values available to the subject and body templates.
#[derive(Debug, Serialize)]
struct ConfirmationContext<'a> {
    name: Option<&'a str>,
    form_title: Option<&'a str>,
    positions: &'a [String],
    submitted_at: Option<String>,
}

impl<'a> ConfirmationContext<'a> {
    fn new(email: &'a ConfirmationEmail) -> Self {
        Self {
            name: email.full_name.as_deref(),
            form_title: email.form_title.as_deref(),
            positions: email.position_preference.as_deref().unwrap_or_default(),
            submitted_at: email.submitted_at.as_deref().map(format_submitted_at),
        }
    }
}

/// Subject and HTML body templates, compiled once.
///
/// The body registry HTML-escapes every value; the subject is plain text.
struct ConfirmationTemplates {
    subject: Handlebars<'static>,
    html: Handlebars<'static>,
}

impl ConfirmationTemplates {
    fn new(subject: &str) -> Result<Self, TemplateError> {
        let mut subject_registry = Handlebars::new();
        subject_registry.register_escape_fn(handlebars::no_escape);
        subject_registry.register_template_string(TEMPLATE, subject)?;

        let mut html_registry = Handlebars::new();
        html_registry.register_template_string(TEMPLATE, CONFIRMATION_HTML)?;

        Ok(Self {
            subject: subject_registry,
            html: html_registry,
        })
    }

    fn render(&self, email: &ConfirmationEmail) -> Result<(String, String), RenderError> {
        let context = ConfirmationContext::new(email);
        Ok((
            self.subject.render(TEMPLATE, &context)?,
            self.html.render(TEMPLATE, &context)?,
        ))
    }
}

#[cfg(test)]
#[path = "email_sender_tests.rs"]
mod tests;
