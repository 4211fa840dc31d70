//! Question-to-field mapping.
//!
//! A [`FieldMapper`] turns a [`FormResponse`] into the field set written to
//! the list store, plus the contact details the optional sinks need. The
//! concrete question-to-field table is configuration: [`TableFieldMapper`]
//! reads it from a [`MappingTable`], normally loaded from YAML at startup.
//!
//! # Example table
//!
//! ```yaml
//! rules:
//!   - question_ref: email
//!     list_field: Email
//!     required: true
//!     role: email
//!   - question_ref: first_name
//!     list_field: FirstName
//!     required: true
//!     role: first_name
//!   - question_ref: positions
//!     list_field: PositionPreference
//!     role: position_preference
//! ```
//!
//! Attribution values are added after mapping by [`apply_attribution`], under
//! the names in [`AttributionKeys`]. Those names are kept apart from mapped
//! fields and never overwrite them.

use crate::payload::{AnswerValue, Attribution, AttributionMember, FormResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::warn;

/// Field set written to the list store, keyed by list column name.
pub type ListFields = BTreeMap<String, Value>;

// ============================================================================
// Mapping table
// ============================================================================

/// Contact detail a mapped question also supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactRole {
    Email,
    FullName,
    FirstName,
    LastName,
    PositionPreference,
}

/// Maps one question reference to one list column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub question_ref: String,
    pub list_field: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub role: Option<ContactRole>,
}

impl FieldRule {
    /// Optional rule without a contact role.
    pub fn new(question_ref: impl Into<String>, list_field: impl Into<String>) -> Self {
        Self {
            question_ref: question_ref.into(),
            list_field: list_field.into(),
            required: false,
            role: None,
        }
    }

    /// Mark the rule as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Attach a contact role.
    pub fn with_role(mut self, role: ContactRole) -> Self {
        self.role = Some(role);
        self
    }
}

/// Question-to-field mapping configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingTable {
    pub rules: Vec<FieldRule>,
}

impl MappingTable {
    /// Build a table from rules without validating it.
    pub fn new(rules: Vec<FieldRule>) -> Self {
        Self { rules }
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, MappingConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, MappingConfigError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|source| MappingConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_yaml_str(&contents)
    }

    /// Check the table for internal consistency.
    ///
    /// # Errors
    ///
    /// Rejects an empty table, blank names, duplicate question references,
    /// duplicate list fields, and a contact role claimed by more than one rule.
    pub fn validate(&self) -> Result<(), MappingConfigError> {
        if self.rules.is_empty() {
            return Err(MappingConfigError::Empty);
        }

        let mut refs = HashSet::new();
        let mut fields = HashSet::new();
        let mut roles = HashSet::new();

        for rule in &self.rules {
            if rule.question_ref.trim().is_empty() || rule.list_field.trim().is_empty() {
                return Err(MappingConfigError::BlankName {
                    question_ref: rule.question_ref.clone(),
                });
            }
            if !refs.insert(rule.question_ref.as_str()) {
                return Err(MappingConfigError::DuplicateQuestionRef(
                    rule.question_ref.clone(),
                ));
            }
            if !fields.insert(rule.list_field.as_str()) {
                return Err(MappingConfigError::DuplicateListField(rule.list_field.clone()));
            }
            if let Some(role) = rule.role {
                if !roles.insert(role) {
                    return Err(MappingConfigError::DuplicateRole(role));
                }
            }
        }

        Ok(())
    }

    /// Rule for a question reference.
    pub fn rule_for(&self, question_ref: &str) -> Option<&FieldRule> {
        self.rules.iter().find(|r| r.question_ref == question_ref)
    }

    /// Whether a list column is produced by some rule.
    pub fn maps_field(&self, list_field: &str) -> bool {
        self.rules.iter().any(|r| r.list_field == list_field)
    }
}

/// Errors in mapping or attribution configuration.
#[derive(Debug, thiserror::Error)]
pub enum MappingConfigError {
    #[error("Failed to read mapping file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse mapping table: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Mapping table has no rules")]
    Empty,

    #[error("Mapping rule for '{question_ref}' has a blank question ref or list field")]
    BlankName { question_ref: String },

    #[error("Question ref '{0}' is mapped more than once")]
    DuplicateQuestionRef(String),

    #[error("List field '{0}' is mapped more than once")]
    DuplicateListField(String),

    #[error("Contact role {0:?} is assigned to more than one rule")]
    DuplicateRole(ContactRole),

    #[error("Attribution key for '{member}' is blank")]
    BlankAttributionKey { member: &'static str },

    #[error("Attribution key '{0}' is used more than once")]
    DuplicateAttributionKey(String),

    #[error("Attribution key '{0}' collides with a mapped list field")]
    AttributionKeyCollision(String),
}

// ============================================================================
// Mapper
// ============================================================================

/// Output of the mapping stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingResult {
    /// Fields ready for the list store.
    pub fields: ListFields,
    /// List fields marked required that had no usable answer. Non-empty is a
    /// hard validation failure.
    pub missing_required: Vec<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub position_preference: Option<Vec<String>>,
    /// Answered questions with no rule. Diagnostic only.
    pub unmapped_refs: Vec<String>,
}

impl MappingResult {
    /// True when every required field was answered.
    pub fn is_valid(&self) -> bool {
        self.missing_required.is_empty()
    }
}

/// Maps a form response onto list-store fields.
#[cfg_attr(test, mockall::automock)]
pub trait FieldMapper: Send + Sync {
    fn map(&self, response: &FormResponse) -> MappingResult;
}

/// [`FieldMapper`] driven by a validated [`MappingTable`].
#[derive(Debug, Clone)]
pub struct TableFieldMapper {
    table: MappingTable,
}

impl TableFieldMapper {
    /// Validate the table and build the mapper.
    pub fn new(table: MappingTable) -> Result<Self, MappingConfigError> {
        table.validate()?;
        Ok(Self { table })
    }
}

impl FieldMapper for TableFieldMapper {
    fn map(&self, response: &FormResponse) -> MappingResult {
        let mut result = MappingResult::default();
        let mut first_name = None;
        let mut last_name = None;

        for rule in &self.table.rules {
            let answer_value = response.answer_for(&rule.question_ref).map(|a| a.value());
            let Some((answer_value, field_value)) =
                answer_value.and_then(|v| to_field_value(&v).map(|fv| (v, fv)))
            else {
                if rule.required {
                    result.missing_required.push(rule.list_field.clone());
                }
                continue;
            };

            match rule.role {
                Some(ContactRole::Email) => result.email = display_text(&answer_value),
                Some(ContactRole::FullName) => result.full_name = display_text(&answer_value),
                Some(ContactRole::FirstName) => first_name = display_text(&answer_value),
                Some(ContactRole::LastName) => last_name = display_text(&answer_value),
                Some(ContactRole::PositionPreference) => {
                    let preferences = position_preferences(&answer_value);
                    if !preferences.is_empty() {
                        result.position_preference = Some(preferences);
                    }
                }
                None => {}
            }

            result.fields.insert(rule.list_field.clone(), field_value);
        }

        if result.full_name.is_none() {
            let parts: Vec<String> = [first_name, last_name].into_iter().flatten().collect();
            if !parts.is_empty() {
                result.full_name = Some(parts.join(" "));
            }
        }

        for answer in &response.answers {
            let reference = answer.reference().unwrap_or(answer.field.id.as_str());
            if self.table.rule_for(reference).is_none() {
                result.unmapped_refs.push(reference.to_string());
            }
        }

        result
    }
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// List value for an answer; `None` when the answer carries nothing usable.
fn to_field_value(value: &AnswerValue) -> Option<Value> {
    match value {
        AnswerValue::Text(s)
        | AnswerValue::Email(s)
        | AnswerValue::PhoneNumber(s)
        | AnswerValue::Url(s)
        | AnswerValue::FileUrl(s)
        | AnswerValue::Date(s) => non_blank(s).map(Value::String),
        AnswerValue::Number(n) => Some(Value::Number(n.clone())),
        AnswerValue::Boolean(b) => Some(Value::Bool(*b)),
        AnswerValue::Choice { label, other } => label
            .as_deref()
            .and_then(non_blank)
            .or_else(|| other.as_deref().and_then(non_blank))
            .map(Value::String),
        AnswerValue::Choices { labels, other } => {
            let items: Vec<Value> = labels
                .iter()
                .chain(other.iter())
                .filter_map(|s| non_blank(s))
                .map(Value::String)
                .collect();
            (!items.is_empty()).then_some(Value::Array(items))
        }
        AnswerValue::Other(Value::Object(map)) if map.is_empty() => None,
        AnswerValue::Other(Value::Null) => None,
        AnswerValue::Other(other) => Some(Value::String(other.to_string())),
    }
}

/// Single-line text for contact roles.
fn display_text(value: &AnswerValue) -> Option<String> {
    match value {
        AnswerValue::Text(s)
        | AnswerValue::Email(s)
        | AnswerValue::PhoneNumber(s)
        | AnswerValue::Url(s)
        | AnswerValue::FileUrl(s)
        | AnswerValue::Date(s) => non_blank(s),
        AnswerValue::Number(n) => Some(n.to_string()),
        AnswerValue::Boolean(b) => Some(b.to_string()),
        AnswerValue::Choice { label, other } => label
            .as_deref()
            .and_then(non_blank)
            .or_else(|| other.as_deref().and_then(non_blank)),
        AnswerValue::Choices { .. } => {
            let joined = position_preferences(value).join(", ");
            non_blank(&joined)
        }
        AnswerValue::Other(_) => None,
    }
}

fn position_preferences(value: &AnswerValue) -> Vec<String> {
    match value {
        AnswerValue::Choice { label, other } => label
            .as_deref()
            .and_then(non_blank)
            .or_else(|| other.as_deref().and_then(non_blank))
            .into_iter()
            .collect(),
        AnswerValue::Choices { labels, other } => labels
            .iter()
            .chain(other.iter())
            .filter_map(|s| non_blank(s))
            .collect(),
        AnswerValue::Text(s) => s.split(',').filter_map(non_blank).collect(),
        other => display_text(other).into_iter().collect(),
    }
}

// ============================================================================
// Attribution forwarding
// ============================================================================

/// List-field names used for forwarded attribution values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionKeys {
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_term: String,
    pub utm_content: String,
    pub page_url: String,
    pub page_referrer: String,
    pub session_id: String,
    pub user_agent: String,
}

impl Default for AttributionKeys {
    fn default() -> Self {
        Self {
            utm_source: "Attribution_UtmSource".to_string(),
            utm_medium: "Attribution_UtmMedium".to_string(),
            utm_campaign: "Attribution_UtmCampaign".to_string(),
            utm_term: "Attribution_UtmTerm".to_string(),
            utm_content: "Attribution_UtmContent".to_string(),
            page_url: "Attribution_PageUrl".to_string(),
            page_referrer: "Attribution_PageReferrer".to_string(),
            session_id: "Attribution_SessionId".to_string(),
            user_agent: "Attribution_UserAgent".to_string(),
        }
    }
}

impl AttributionKeys {
    /// List-field name for an attribution member.
    pub fn key(&self, member: AttributionMember) -> &str {
        match member {
            AttributionMember::UtmSource => &self.utm_source,
            AttributionMember::UtmMedium => &self.utm_medium,
            AttributionMember::UtmCampaign => &self.utm_campaign,
            AttributionMember::UtmTerm => &self.utm_term,
            AttributionMember::UtmContent => &self.utm_content,
            AttributionMember::PageUrl => &self.page_url,
            AttributionMember::PageReferrer => &self.page_referrer,
            AttributionMember::SessionId => &self.session_id,
            AttributionMember::UserAgent => &self.user_agent,
        }
    }

    /// Check the keys are usable with `table`.
    ///
    /// # Errors
    ///
    /// Rejects blank keys, keys used twice, and keys that collide with a list
    /// field the table already maps.
    pub fn validate_against(&self, table: &MappingTable) -> Result<(), MappingConfigError> {
        let mut seen = HashSet::new();
        for member in AttributionMember::ALL {
            let key = self.key(member);
            if key.trim().is_empty() {
                return Err(MappingConfigError::BlankAttributionKey {
                    member: member.hidden_key(),
                });
            }
            if !seen.insert(key) {
                return Err(MappingConfigError::DuplicateAttributionKey(key.to_string()));
            }
            if table.maps_field(key) {
                return Err(MappingConfigError::AttributionKeyCollision(key.to_string()));
            }
        }
        Ok(())
    }
}

/// Add present attribution values to `fields`.
///
/// Keys already set by the mapper are left untouched; their names are
/// returned so the caller can report them.
#[must_use = "skipped keys should be reported"]
pub fn apply_attribution(
    fields: &mut ListFields,
    attribution: &Attribution,
    keys: &AttributionKeys,
) -> Vec<String> {
    let mut skipped = Vec::new();

    for (member, value) in attribution.present() {
        let key = keys.key(member);
        if fields.contains_key(key) {
            warn!(
                key = %key,
                member = member.hidden_key(),
                "Attribution key already set by mapper - not overwriting"
            );
            skipped.push(key.to_string());
            continue;
        }
        fields.insert(key.to_string(), Value::String(value.to_string()));
    }

    skipped
}

#[cfg(test)]
#[path = "mapping_tests.rs"]
mod tests;
