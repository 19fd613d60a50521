//! Request and Response Types for the MQE HTTP Server
//!
//! This module contains all serialization/deserialization types used by the HTTP API.

use mqe::profile::Profile;
use mqe::query::constraint::Constraint;
use mqe::query::CommandResult;
use mqe::types::{MetricKey, TaggedMetric};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Query API Types
// =============================================================================

/// Query request, decoded from a JSON body
#[derive(Debug, Default, Deserialize)]
pub struct QueryForm {
    /// Query text
    #[serde(default)]
    pub query: String,
    /// Return profiler spans with the response
    #[serde(default)]
    pub profile: bool,
    /// Ask backends for raw payloads alongside sampled series
    #[serde(default)]
    pub include_raw: bool,
    /// Constraint applied on top of every predicate in the query
    #[serde(default, rename = "where")]
    pub constraint: Option<Constraint>,
}

/// Query request as sent by an HTML form or a query string
///
/// Flags arrive as text and `where` as JSON text.
#[derive(Debug, Default, Deserialize)]
pub struct RawQueryForm {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub include_raw: Option<String>,
    #[serde(default, rename = "where")]
    pub constraint: Option<String>,
}

/// Form flags accept `1`, `t`, `true` in any case; anything else is false
fn parse_flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "t" | "true"))
}

impl TryFrom<RawQueryForm> for QueryForm {
    type Error = mqe::QueryError;

    fn try_from(raw: RawQueryForm) -> Result<Self, Self::Error> {
        let constraint = match raw.constraint.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(text) => Some(Constraint::from_json(text)?),
        };
        Ok(QueryForm {
            query: raw.query,
            profile: parse_flag(raw.profile.as_deref()),
            include_raw: parse_flag(raw.include_raw.as_deref()),
            constraint,
        })
    }
}

/// Successful or failed query response
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Command name (`select`, `describe all`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Profiler spans, only when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Vec<Profile>>,
}

impl QueryResponse {
    /// Wrap a command result
    pub fn success(name: &str, result: CommandResult) -> Result<Self, serde_json::Error> {
        Ok(Self {
            success: true,
            message: None,
            name: Some(name.to_string()),
            body: Some(serde_json::to_value(result.body)?),
            metadata: Some(result.metadata),
            profile: None,
        })
    }

    /// Failure carrying only a message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            name: None,
            body: None,
            metadata: None,
            profile: None,
        }
    }
}

// =============================================================================
// Ingestion Types
// =============================================================================

/// `POST /ingest` body
pub type IngestRequest = Vec<TaggedMetric>;

/// Outcome of an ingest or any other write-style call
#[derive(Debug, Serialize)]
pub struct SimpleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// =============================================================================
// Token and Health Types
// =============================================================================

/// Autocomplete vocabulary
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    /// Registered function names, sorted
    pub functions: Vec<String>,
    /// Known metric keys, sorted
    pub metrics: Vec<MetricKey>,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_flags_and_constraint() {
        let raw = RawQueryForm {
            query: "describe all".to_string(),
            profile: Some("TRUE".to_string()),
            include_raw: Some("no".to_string()),
            constraint: Some(r#"{"key_is": {"key": "dc", "value": "west"}}"#.to_string()),
        };
        let form = QueryForm::try_from(raw).unwrap();
        assert!(form.profile);
        assert!(!form.include_raw);
        assert!(form.constraint.is_some());
    }

    #[test]
    fn test_form_rejects_bad_constraint() {
        let raw = RawQueryForm {
            constraint: Some("{}".to_string()),
            ..Default::default()
        };
        // Empty constraints are caught when compiled, not when decoded
        let form = QueryForm::try_from(raw).unwrap();
        let err = form.constraint.unwrap().to_predicate().unwrap_err();
        assert_eq!(err.to_string(), "constraint has no contents");

        let raw = RawQueryForm {
            constraint: Some("not json".to_string()),
            ..Default::default()
        };
        assert!(QueryForm::try_from(raw).is_err());
    }

    #[test]
    fn test_error_response_omits_empty_fields() {
        let json = serde_json::to_value(QueryResponse::error("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "message": "boom"}));
    }
}
