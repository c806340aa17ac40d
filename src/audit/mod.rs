//! Audit Sink
//!
//! The pipeline reports every decision to an [`AuditSink`] as a structured [`AuditEvent`]. Sinks
//! are observers: `record` returns nothing, so a sink that drops or fails to write an event can
//! never change an admission decision.
//!
//! [`TracingAuditSink`] emits each event through `tracing` under the `portcullis::audit` target.
//! Query text is cut to a configurable preview before it reaches any sink.

use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

/// Pipeline stage that rejected a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectionStage {
    /// Input Schema Validator
    Input,
    /// Statement classifier
    Statement,
}

impl RejectionStage {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Statement => "statement",
        }
    }
}

/// One structured audit fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    Rejected {
        stage: RejectionStage,
        caller: String,
        rules: Vec<&'static str>,
        reasons: Vec<String>,
        query: String,
    },
    RateLimited {
        caller: String,
        retry_after: Duration,
    },
    Admitted {
        caller: String,
        first_keyword: String,
        query: String,
    },
    Executed {
        caller: String,
        rows: usize,
        truncated: bool,
        elapsed: Duration,
    },
    ExecutionFailed {
        caller: String,
        message: String,
    },
}

impl AuditEvent {
    /// Caller identity the event is about
    #[must_use]
    pub fn caller(&self) -> &str {
        match self {
            Self::Rejected { caller, .. }
            | Self::RateLimited { caller, .. }
            | Self::Admitted { caller, .. }
            | Self::Executed { caller, .. }
            | Self::ExecutionFailed { caller, .. } => caller,
        }
    }
}

/// Receiver of audit events
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Cut `text` to at most `max_chars` characters, marking the cut with `...`
#[must_use]
pub fn query_preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Sink that writes events to the `tracing` subscriber
///
/// Rejections and rate limiting log at `WARN`, admissions and executions at `INFO`, adapter
/// failures at `ERROR`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        match event {
            AuditEvent::Rejected { stage, caller, rules, reasons, query } => {
                tracing::warn!(
                    target: "portcullis::audit",
                    caller = %caller,
                    stage = stage.as_str(),
                    rules = ?rules,
                    reasons = ?reasons,
                    query = %query,
                    "request rejected"
                );
            }
            AuditEvent::RateLimited { caller, retry_after } => {
                tracing::warn!(
                    target: "portcullis::audit",
                    caller = %caller,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "rate limit exceeded"
                );
            }
            AuditEvent::Admitted { caller, first_keyword, query } => {
                tracing::info!(
                    target: "portcullis::audit",
                    caller = %caller,
                    keyword = %first_keyword,
                    query = %query,
                    "statement admitted"
                );
            }
            AuditEvent::Executed { caller, rows, truncated, elapsed } => {
                tracing::info!(
                    target: "portcullis::audit",
                    caller = %caller,
                    rows = *rows,
                    truncated = *truncated,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "statement executed"
                );
            }
            AuditEvent::ExecutionFailed { caller, message } => {
                tracing::error!(
                    target: "portcullis::audit",
                    caller = %caller,
                    message = %message,
                    "statement failed"
                );
            }
        }
    }
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far, oldest first
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        // a poisoned lock only loses audit history
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_query_preview() {
        assert_eq!(query_preview("SELECT 1", 200), "SELECT 1");
        assert_eq!(query_preview("SELECT 1", 8), "SELECT 1");
        assert_eq!(query_preview("SELECT 1", 6), "SELECT...");
        assert_eq!(query_preview("", 0), "");
        assert_eq!(query_preview("abc", 0), "...");
    }

    #[test]
    fn test_query_preview_counts_chars_not_bytes() {
        assert_eq!(query_preview("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemoryAuditSink::new();
        sink.record(&AuditEvent::RateLimited {
            caller: "a".to_string(),
            retry_after: Duration::from_secs(3),
        });
        sink.record(&AuditEvent::ExecutionFailed {
            caller: "b".to_string(),
            message: "boom".to_string(),
        });

        let callers: Vec<_> = sink.events().iter().map(|e| e.caller().to_string()).collect();
        assert_eq!(callers, vec!["a", "b"]);
    }

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::Rejected {
            stage: RejectionStage::Statement,
            caller: "10.0.0.1".to_string(),
            rules: vec!["keyword"],
            reasons: vec!["Forbidden operation: DROP".to_string()],
            query: "DROP TABLE users".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "rejected");
        assert_eq!(json["stage"], "statement");
        assert_eq!(json["rules"], serde_json::json!(["keyword"]));
    }

    #[test]
    fn test_tracing_sink_never_panics_without_subscriber() {
        let sink = TracingAuditSink;
        sink.record(&AuditEvent::Executed {
            caller: "c".to_string(),
            rows: 3,
            truncated: true,
            elapsed: Duration::from_millis(12),
        });
    }
}
