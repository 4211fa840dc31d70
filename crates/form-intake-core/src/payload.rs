//! Webhook body parsing.
//!
//! Decodes the raw delivery body into a [`FormResponse`] and extracts the
//! campaign [`Attribution`] carried in the form's hidden fields. Answers are
//! kept close to the provider's wire shape; interpreting them is the job of
//! the [`mapping`](crate::mapping) stage.

use crate::CorrelationId;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

// ============================================================================
// Raw delivery
// ============================================================================

/// An inbound webhook delivery exactly as received.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    /// Raw body bytes. Never re-serialised before signature verification.
    pub body: Bytes,
    /// Value of the signature header, if one was sent.
    pub signature: Option<String>,
    /// Identifier carried by every log line for this delivery.
    pub correlation_id: CorrelationId,
}

impl WebhookDelivery {
    /// Create a delivery with a fresh correlation id.
    pub fn new(body: impl Into<Bytes>, signature: Option<String>) -> Self {
        Self {
            body: body.into(),
            signature,
            correlation_id: CorrelationId::new(),
        }
    }

    /// Use the correlation id assigned by the caller.
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Signature header value, if present.
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }
}

// ============================================================================
// Form response
// ============================================================================

/// A submitted form response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormResponse {
    pub form_id: String,

    /// Provider-assigned response token, unique per submission.
    pub token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landed_at: Option<String>,

    /// Submission time as sent by the provider (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<String>,

    #[serde(default)]
    pub answers: Vec<Answer>,

    /// Hidden fields used for campaign attribution.
    #[serde(default, deserialize_with = "deserialize_hidden")]
    pub hidden: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<FormDefinition>,
}

impl FormResponse {
    /// Find the answer for a question reference.
    pub fn answer_for(&self, reference: &str) -> Option<&Answer> {
        self.answers
            .iter()
            .find(|a| a.reference() == Some(reference))
    }

    /// Title of the form, when the definition was included.
    pub fn form_title(&self) -> Option<&str> {
        self.definition.as_ref().and_then(|d| d.title.as_deref())
    }
}

/// Hidden values are strings on the wire, but tolerate numbers, booleans and
/// nulls rather than rejecting the whole delivery.
fn deserialize_hidden<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<HashMap<String, Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key, s)),
            Value::Null => None,
            Value::Number(n) => Some((key, n.to_string())),
            Value::Bool(b) => Some((key, b.to_string())),
            other => Some((key, other.to_string())),
        })
        .collect())
}

/// Form definition snapshot included with some deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDefinition {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub fields: Vec<DefinitionField>,
}

/// One question in a [`FormDefinition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionField {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,
}

/// The question an answer belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerField {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,
}

/// A single answer as delivered.
///
/// The provider tags each answer with a `type` and stores the value under a
/// member of the same name (`{"type":"email","email":"..."}`). Use
/// [`Answer::value`] for a typed view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub field: AnswerField,

    #[serde(rename = "type")]
    pub answer_type: String,

    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// Typed view of an [`Answer`].
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerValue {
    Text(String),
    Email(String),
    PhoneNumber(String),
    Url(String),
    FileUrl(String),
    Date(String),
    Number(serde_json::Number),
    Boolean(bool),
    Choice {
        label: Option<String>,
        other: Option<String>,
    },
    Choices {
        labels: Vec<String>,
        other: Option<String>,
    },
    /// Any answer type not modelled above, or one missing its value member.
    Other(Value),
}

impl Answer {
    /// Question reference this answer belongs to.
    pub fn reference(&self) -> Option<&str> {
        self.field.reference.as_deref()
    }

    fn string_member(&self, key: &str) -> Option<String> {
        self.data.get(key).and_then(Value::as_str).map(str::to_string)
    }

    /// Interpret the answer according to its type tag.
    pub fn value(&self) -> AnswerValue {
        let typed = match self.answer_type.as_str() {
            "text" => self.string_member("text").map(AnswerValue::Text),
            "email" => self.string_member("email").map(AnswerValue::Email),
            "phone_number" => self
                .string_member("phone_number")
                .map(AnswerValue::PhoneNumber),
            "url" => self.string_member("url").map(AnswerValue::Url),
            "file_url" => self.string_member("file_url").map(AnswerValue::FileUrl),
            "date" => self.string_member("date").map(AnswerValue::Date),
            "number" => match self.data.get("number") {
                Some(Value::Number(n)) => Some(AnswerValue::Number(n.clone())),
                _ => None,
            },
            "boolean" => self
                .data
                .get("boolean")
                .and_then(Value::as_bool)
                .map(AnswerValue::Boolean),
            "choice" => self.data.get("choice").map(|choice| AnswerValue::Choice {
                label: choice.get("label").and_then(Value::as_str).map(String::from),
                other: choice.get("other").and_then(Value::as_str).map(String::from),
            }),
            "choices" => self.data.get("choices").map(|choices| AnswerValue::Choices {
                labels: choices
                    .get("labels")
                    .and_then(Value::as_array)
                    .map(|labels| {
                        labels
                            .iter()
                            .filter_map(Value::as_str)
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default(),
                other: choices.get("other").and_then(Value::as_str).map(String::from),
            }),
            _ => None,
        };

        typed.unwrap_or_else(|| AnswerValue::Other(Value::Object(self.data.clone())))
    }
}

// ============================================================================
// Attribution
// ============================================================================

/// Names of the attribution members, in hidden-field spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributionMember {
    UtmSource,
    UtmMedium,
    UtmCampaign,
    UtmTerm,
    UtmContent,
    PageUrl,
    PageReferrer,
    SessionId,
    UserAgent,
}

impl AttributionMember {
    pub const ALL: [AttributionMember; 9] = [
        Self::UtmSource,
        Self::UtmMedium,
        Self::UtmCampaign,
        Self::UtmTerm,
        Self::UtmContent,
        Self::PageUrl,
        Self::PageReferrer,
        Self::SessionId,
        Self::UserAgent,
    ];

    /// Hidden-field key carrying this member.
    pub fn hidden_key(&self) -> &'static str {
        match self {
            Self::UtmSource => "utm_source",
            Self::UtmMedium => "utm_medium",
            Self::UtmCampaign => "utm_campaign",
            Self::UtmTerm => "utm_term",
            Self::UtmContent => "utm_content",
            Self::PageUrl => "page_url",
            Self::PageReferrer => "page_referrer",
            Self::SessionId => "session_id",
            Self::UserAgent => "user_agent",
        }
    }
}

/// Campaign attribution extracted from hidden fields. Every member is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Attribution {
    /// Extract attribution from a hidden-field map. Blank values count as absent.
    pub fn from_hidden(hidden: &HashMap<String, String>) -> Self {
        let pick = |member: AttributionMember| {
            hidden
                .get(member.hidden_key())
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        Self {
            utm_source: pick(AttributionMember::UtmSource),
            utm_medium: pick(AttributionMember::UtmMedium),
            utm_campaign: pick(AttributionMember::UtmCampaign),
            utm_term: pick(AttributionMember::UtmTerm),
            utm_content: pick(AttributionMember::UtmContent),
            page_url: pick(AttributionMember::PageUrl),
            page_referrer: pick(AttributionMember::PageReferrer),
            session_id: pick(AttributionMember::SessionId),
            user_agent: pick(AttributionMember::UserAgent),
        }
    }

    /// Value of a single member.
    pub fn get(&self, member: AttributionMember) -> Option<&str> {
        let value = match member {
            AttributionMember::UtmSource => &self.utm_source,
            AttributionMember::UtmMedium => &self.utm_medium,
            AttributionMember::UtmCampaign => &self.utm_campaign,
            AttributionMember::UtmTerm => &self.utm_term,
            AttributionMember::UtmContent => &self.utm_content,
            AttributionMember::PageUrl => &self.page_url,
            AttributionMember::PageReferrer => &self.page_referrer,
            AttributionMember::SessionId => &self.session_id,
            AttributionMember::UserAgent => &self.user_agent,
        };
        value.as_deref()
    }

    /// Present members in declaration order.
    pub fn present(&self) -> impl Iterator<Item = (AttributionMember, &str)> + '_ {
        AttributionMember::ALL
            .into_iter()
            .filter_map(move |member| self.get(member).map(|v| (member, v)))
    }

    /// True when no member is present.
    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Result of parsing a delivery body.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDelivery {
    /// Provider event id from the envelope, if present.
    pub event_id: Option<String>,
    /// Provider event type from the envelope, if present.
    pub event_type: Option<String>,
    pub form_response: FormResponse,
    pub attribution: Attribution,
}

/// Errors while parsing a delivery body.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Body is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Body has no form_response object")]
    MissingFormResponse,

    #[error("form_response could not be decoded: {0}")]
    InvalidFormResponse(#[source] serde_json::Error),
}

/// Parse a raw delivery body.
///
/// # Errors
///
/// - [`PayloadError::Malformed`] when the body is not JSON
/// - [`PayloadError::MissingFormResponse`] when there is no top-level
///   `form_response` object
/// - [`PayloadError::InvalidFormResponse`] when `form_response` lacks its
///   identifying members or has the wrong shape
pub fn parse_delivery(body: &[u8]) -> Result<ParsedDelivery, PayloadError> {
    let envelope: Value = serde_json::from_slice(body).map_err(PayloadError::Malformed)?;

    let form_value = envelope
        .get("form_response")
        .filter(|v| v.is_object())
        .ok_or(PayloadError::MissingFormResponse)?;

    let form_response =
        FormResponse::deserialize(form_value).map_err(PayloadError::InvalidFormResponse)?;

    let attribution = Attribution::from_hidden(&form_response.hidden);

    Ok(ParsedDelivery {
        event_id: envelope
            .get("event_id")
            .and_then(Value::as_str)
            .map(String::from),
        event_type: envelope
            .get("event_type")
            .and_then(Value::as_str)
            .map(String::from),
        form_response,
        attribution,
    })
}

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
