//! Portcullis - Readonly SQL Query Gateway
//!
//! Portcullis sits in front of a relational database and decides whether a caller-submitted
//! statement may run, what canonical form is executed, and how many rows come back.
//!
//! # Admission Pipeline
//! request → input validation → admission gate → classification → execution adapter → bounding
//!
//! # Core Principles
//! - Readonly by construction: keyword whitelist in the classifier plus readonly sessions in
//!   every adapter
//! - Every failed rule is reported, not just the first
//! - Configuration over constants: limits, windows, and rule tables are all overridable
//! - JSON-only output on stdout; logs and audit events go to stderr
//!
//! # Module Organization
//! - [`error`] - Error taxonomy and stable error codes
//! - [`output`] - JSON output envelope types
//! - [`config`] - Configuration surface and file resolution
//! - [`validation`] - Input schema validation
//! - [`classifier`] - Statement classification and canonicalization
//! - [`gate`] - Per-caller rate limiting
//! - [`bounding`] - Result row caps and truncation
//! - [`engine`] - Execution adapters (`SQLite`, `PostgreSQL`, `MySQL`)
//! - [`audit`] - Structured audit events
//! - [`gateway`] - The pipeline wired together
//! - [`mcp`] - Stdio JSON-RPC tool server

pub mod audit;
pub mod bounding;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod mcp;
pub mod output;
pub mod validation;

pub use audit::{AuditEvent, AuditSink, MemoryAuditSink, RejectionStage, TracingAuditSink};
pub use bounding::{bound, effective_limit, AccessTier, ResultSet};
pub use classifier::{canonicalize, ClassifiedStatement, Classifier, StatementRule};
pub use config::GatewayConfig;
pub use engine::{
    ConnectionAdapter, ConnectionConfig, DatabaseType, ExecutionAdapter, ExecutionOptions, RawRows,
};
pub use error::{GatewayError, Result};
pub use gate::{Admission, AdmissionGate, MemoryWindowStore, RateLimitWindow, WindowStore};
pub use gateway::{Gateway, QueryOutcome};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use validation::{validate_identifier, validate_request, QueryRequest, ValidationVerdict, Violation};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_exports() {
        let gateway = Gateway::new(GatewayConfig::default()).unwrap();
        assert_eq!(gateway.effective_limit(5000, AccessTier::Public), 100);
        assert_eq!(DatabaseType::SQLite.as_str(), "sqlite");
    }
}
