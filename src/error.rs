//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout Portcullis.
//! All errors are structured and map to specific error codes for JSON output.
//!
//! # Error Categories
//! - `MalformedInput`: request shape/type/range violations (fix your request)
//! - `InadmissibleStatement`: keyword, pattern, or structure rejections (statement not allowed)
//! - `RateExceeded`: the caller exhausted its admission window, with a retry hint
//! - `ExecutionFailed`: opaque failure surfaced by an execution adapter (including timeouts)
//! - `ConnectionFailed`: the adapter could not reach the database
//! - `EngineError`: engine-specific database errors
//! - `ConfigError`: configuration file or rule table errors
//!
//! Every category is recoverable: a rejected request never degrades the gateway for
//! subsequent callers.

use thiserror::Error;

/// Main error type for Portcullis operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Request shape, type, or range violations (every violated rule is listed)
    #[error("Malformed input: {}", .0.join("; "))]
    MalformedInput(Vec<String>),

    /// Statement rejected by the classifier (every violated rule is listed)
    #[error("Statement not allowed: {}", .0.join("; "))]
    InadmissibleStatement(Vec<String>),

    /// Caller exceeded its request window
    #[error("Rate limit exceeded, retry after {retry_after_ms}ms")]
    RateExceeded { retry_after_ms: u64 },

    /// Execution adapter failure, message passed through untouched
    #[error("Query execution failed: {0}")]
    ExecutionFailed(String),

    /// Database connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Engine-specific database error
    #[error("Engine error ({engine}): {detail}")]
    EngineError { engine: String, detail: String },

    /// Configuration error (file not found, invalid JSON, invalid rule table, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl GatewayError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling by callers.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "MALFORMED_INPUT",
            Self::InadmissibleStatement(_) => "INADMISSIBLE_STATEMENT",
            Self::RateExceeded { .. } => "RATE_EXCEEDED",
            Self::ExecutionFailed(_) => "EXECUTION_FAILED",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::EngineError { .. } => "ENGINE_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Get human-readable error message (no credentials or file contents)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Individual rejection reasons for the malformed-input and inadmissible categories
    #[must_use]
    pub fn reasons(&self) -> &[String] {
        match self {
            Self::MalformedInput(reasons) | Self::InadmissibleStatement(reasons) => reasons,
            _ => &[],
        }
    }

    /// Retry hint for rate-limit rejections
    #[must_use]
    pub const fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateExceeded { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Create a malformed input error
    pub fn malformed_input(reasons: Vec<String>) -> Self {
        Self::MalformedInput(reasons)
    }

    /// Create an inadmissible statement error
    pub fn inadmissible(reasons: Vec<String>) -> Self {
        Self::InadmissibleStatement(reasons)
    }

    /// Create a rate exceeded error
    pub const fn rate_exceeded(retry_after_ms: u64) -> Self {
        Self::RateExceeded { retry_after_ms }
    }

    /// Create an execution failure error
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed(message.into())
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create an engine-specific error
    pub fn engine_error(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EngineError { engine: engine.into(), detail: detail.into() }
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

/// Result type alias for Portcullis operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(GatewayError::malformed_input(vec![]).error_code(), "MALFORMED_INPUT");
        assert_eq!(GatewayError::inadmissible(vec![]).error_code(), "INADMISSIBLE_STATEMENT");
        assert_eq!(GatewayError::rate_exceeded(10).error_code(), "RATE_EXCEEDED");
        assert_eq!(GatewayError::execution_failed("test").error_code(), "EXECUTION_FAILED");
        assert_eq!(GatewayError::connection_failed("test").error_code(), "CONNECTION_FAILED");
        assert_eq!(GatewayError::engine_error("mysql", "test").error_code(), "ENGINE_ERROR");
        assert_eq!(GatewayError::config_error("test").error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_error_messages_join_reasons() {
        let err = GatewayError::inadmissible(vec![
            "Forbidden operation: DROP".to_string(),
            "Multiple statements are not allowed".to_string(),
        ]);
        let message = err.message();
        assert!(message.starts_with("Statement not allowed"));
        assert!(message.contains("Forbidden operation: DROP; Multiple statements"));

        let err = GatewayError::engine_error("postgres", "connection timeout");
        assert!(err.message().contains("postgres"));
        assert!(err.message().contains("connection timeout"));
    }

    #[test]
    fn test_reasons_only_for_validation_categories() {
        let err = GatewayError::malformed_input(vec!["limit must be an integer".to_string()]);
        assert_eq!(err.reasons(), ["limit must be an integer".to_string()]);

        assert!(GatewayError::execution_failed("boom").reasons().is_empty());
        assert!(GatewayError::rate_exceeded(5).reasons().is_empty());
    }

    #[test]
    fn test_retry_hint() {
        assert_eq!(GatewayError::rate_exceeded(1500).retry_after_ms(), Some(1500));
        assert_eq!(GatewayError::config_error("x").retry_after_ms(), None);
        assert!(GatewayError::rate_exceeded(1500).message().contains("1500ms"));
    }

    #[test]
    fn test_execution_message_passed_through() {
        let err = GatewayError::execution_failed("no such table: users");
        assert!(matches!(&err, GatewayError::ExecutionFailed(m) if m == "no such table: users"));
    }
}
