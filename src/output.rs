//! JSON Output Envelope Types
//!
//! Every CLI command and stdio tool call returns either a [`SuccessEnvelope`] or an
//! [`ErrorEnvelope`].
//!
//! # Output Contract
//! - Success: `{"ok": true, "engine": "...", "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "engine": "...", "command": "...", "error": {"code": "...", "message": "..."}}`
//!
//! Rejections also carry `error.reasons` (every failed rule) and rate-limit rejections carry
//! `error.retry_after_ms`. Output is stable and suitable for programmatic parsing.

use serde::{Deserialize, Serialize};

use crate::bounding::ResultSet;
use crate::error::GatewayError;
use crate::gateway::QueryOutcome;

/// Success envelope for operation results
///
/// Generic over the data type to support different operation return values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Database engine used for this operation (postgres, mysql, sqlite)
    pub engine: String,

    /// Command that was executed (query, check, preview)
    pub command: String,

    /// Operation-specific data
    pub data: T,

    /// Execution metadata
    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(
        engine: impl Into<String>,
        command: impl Into<String>,
        data: T,
        meta: Metadata,
    ) -> Self {
        Self { ok: true, engine: engine.into(), command: command.into(), data, meta }
    }
}

impl SuccessEnvelope<ResultSet> {
    /// Envelope for an executed request
    pub fn from_outcome(
        engine: impl Into<String>,
        command: impl Into<String>,
        outcome: QueryOutcome,
    ) -> Self {
        let execution_ms = u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX);
        let meta = Metadata::for_rows(execution_ms, outcome.result.rows.len(), outcome.result.truncated);
        Self::new(engine, command, outcome.result, meta)
    }
}

/// Error envelope for operation failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    /// Database engine (empty string if not engine-specific)
    pub engine: String,

    /// Command that was attempted
    pub command: String,

    /// Error information
    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(engine: impl Into<String>, command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, engine: engine.into(), command: command.into(), error }
    }

    /// Create error envelope from `GatewayError`
    pub fn from_error(
        engine: impl Into<String>,
        command: impl Into<String>,
        err: &GatewayError,
    ) -> Self {
        Self::new(engine, command, ErrorInfo::from(err))
    }
}

/// Error information structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "INADMISSIBLE_STATEMENT", "RATE_EXCEEDED")
    pub code: String,

    /// Human-readable error message (no credentials)
    pub message: String,

    /// Every failed rule, for malformed input and inadmissible statements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,

    /// Milliseconds until the caller's window ends, for rate-limit rejections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into(), reasons: Vec::new(), retry_after_ms: None }
    }
}

impl From<&GatewayError> for ErrorInfo {
    fn from(err: &GatewayError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.message(),
            reasons: err.reasons().to_vec(),
            retry_after_ms: err.retry_after_ms(),
        }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Execution time in milliseconds
    pub execution_ms: u64,

    /// Number of rows returned (None for operations without rows)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<usize>,

    /// Whether rows were dropped by the limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
}

impl Metadata {
    /// Metadata with just execution time
    pub const fn new(execution_ms: u64) -> Self {
        Self { execution_ms, rows_returned: None, truncated: None }
    }

    pub const fn for_rows(execution_ms: u64, rows_returned: usize, truncated: bool) -> Self {
        Self { execution_ms, rows_returned: Some(rows_returned), truncated: Some(truncated) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_serialization() {
        let envelope = SuccessEnvelope::new(
            "postgres",
            "query",
            serde_json::json!({"result": "test"}),
            Metadata::for_rows(42, 10, false),
        );

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""ok":true"#));
        assert!(json.contains(r#""engine":"postgres"#));
        assert!(json.contains(r#""command":"query"#));
        assert!(json.contains(r#""execution_ms":42"#));
        assert!(json.contains(r#""rows_returned":10"#));
        assert!(json.contains(r#""truncated":false"#));
    }

    #[test]
    fn test_error_envelope_serialization() {
        let envelope = ErrorEnvelope::new(
            "mysql",
            "query",
            ErrorInfo::new("CONNECTION_FAILED", "Could not connect to database"),
        );

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""ok":false"#));
        assert!(json.contains(r#""code":"CONNECTION_FAILED"#));
        assert!(json.contains(r#""message":"Could not connect to database"#));
        assert!(!json.contains("reasons"));
        assert!(!json.contains("retry_after_ms"));
    }

    #[test]
    fn test_error_envelope_carries_reasons() {
        let err = GatewayError::inadmissible(vec![
            "Potential SQL injection pattern detected: statement separator".to_string(),
            "Multiple statements are not allowed".to_string(),
        ]);
        let envelope = ErrorEnvelope::from_error("sqlite", "query", &err);

        assert!(!envelope.ok);
        assert_eq!(envelope.error.code, "INADMISSIBLE_STATEMENT");
        assert_eq!(envelope.error.reasons.len(), 2);
        assert_eq!(envelope.error.retry_after_ms, None);
    }

    #[test]
    fn test_error_envelope_carries_retry_hint() {
        let envelope = ErrorEnvelope::from_error("sqlite", "query", &GatewayError::rate_exceeded(45_000));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["error"]["retry_after_ms"], 45_000);
        assert!(json["error"].get("reasons").is_none());
    }

    #[test]
    fn test_metadata_without_rows() {
        let json = serde_json::to_string(&Metadata::new(100)).unwrap();
        assert!(json.contains(r#""execution_ms":100"#));
        assert!(!json.contains("rows_returned"));
        assert!(!json.contains("truncated"));
    }
}
