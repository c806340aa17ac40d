//! Query Admission Pipeline
//!
//! Wires the stages together in their fixed order:
//!
//! ```text
//! request → input validation → admission gate → classification → adapter → bounding → response
//! ```
//!
//! Validation and classification are pure and fast; the adapter call is the only stage that
//! blocks and it is bounded by the validated timeout. Each stage reports its decision to the
//! audit sink. The only state shared between requests is the admission gate's window store.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audit::{query_preview, AuditEvent, AuditSink, RejectionStage, TracingAuditSink};
use crate::bounding::{self, AccessTier, ResultSet};
use crate::classifier::{ClassifiedStatement, Classifier};
use crate::config::GatewayConfig;
use crate::engine::{ExecutionAdapter, ExecutionOptions, RawRows};
use crate::error::{GatewayError, Result};
use crate::gate::{Admission, AdmissionGate};
use crate::validation::{self, QueryRequest, ValidationVerdict};

/// A successfully executed request
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub statement: ClassifiedStatement,
    pub result: ResultSet,
    pub elapsed: Duration,
}

/// The admission pipeline with its configuration, rules, and rate-limit state
pub struct Gateway {
    config: GatewayConfig,
    classifier: Classifier,
    gate: AdmissionGate,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("rules", &self.classifier.rule_names())
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Gateway with an in-memory admission gate and the tracing audit sink
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let gate = AdmissionGate::new(config.rate_limit);
        Self::with_parts(config, gate, Arc::new(TracingAuditSink))
    }

    /// Gateway with an injected gate (and therefore window store) and audit sink
    ///
    /// Fails when the configuration is inconsistent or a rule pattern does not compile.
    pub fn with_parts(
        config: GatewayConfig,
        gate: AdmissionGate,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        config.validate()?;
        let classifier = Classifier::from_tables(&config.rules)?;
        Ok(Self { config, classifier, gate, audit })
    }

    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    #[must_use]
    pub const fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    fn preview(&self, text: &str) -> String {
        query_preview(text, self.config.audit.query_preview_chars)
    }

    fn reject(
        &self,
        stage: RejectionStage,
        caller: &str,
        query: &str,
        verdict: &ValidationVerdict,
    ) -> GatewayError {
        self.audit.record(&AuditEvent::Rejected {
            stage,
            caller: caller.to_string(),
            rules: verdict.rules(),
            reasons: verdict.reasons(),
            query: self.preview(query),
        });

        match stage {
            RejectionStage::Input => GatewayError::malformed_input(verdict.reasons()),
            RejectionStage::Statement => GatewayError::inadmissible(verdict.reasons()),
        }
    }

    /// Input schema validation of an untyped payload
    pub fn validate_request(&self, payload: &Value, caller: &str) -> Result<QueryRequest> {
        validation::validate_request(payload, caller, &self.config.limits).map_err(|verdict| {
            let query = payload
                .get("sql")
                .or_else(|| payload.get("query"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            self.reject(RejectionStage::Input, caller, query, &verdict)
        })
    }

    /// Statement classification of an already validated request
    pub fn classify(&self, request: &QueryRequest) -> Result<ClassifiedStatement> {
        match self.classifier.classify(&request.raw_text) {
            Ok(statement) => {
                self.audit.record(&AuditEvent::Admitted {
                    caller: request.caller_identity.clone(),
                    first_keyword: statement.first_keyword().to_string(),
                    query: self.preview(statement.canonical_text()),
                });
                Ok(statement)
            }
            Err(verdict) => Err(self.reject(
                RejectionStage::Statement,
                &request.caller_identity,
                &request.raw_text,
                &verdict,
            )),
        }
    }

    /// Input validation followed by classification, with no rate limiting and no execution
    pub fn validate_and_classify(
        &self,
        payload: &Value,
        caller: &str,
    ) -> Result<(QueryRequest, ClassifiedStatement)> {
        let request = self.validate_request(payload, caller)?;
        let statement = self.classify(&request)?;
        Ok((request, statement))
    }

    /// Count one request against `caller`'s window
    ///
    /// # Returns
    /// * `Ok(remaining)` when admitted
    /// * `Err(GatewayError::RateExceeded)` carrying the time until the window ends
    pub fn check_admission(&self, caller: &str) -> Result<u32> {
        match self.gate.check(caller) {
            Admission::Admitted { remaining } => Ok(remaining),
            Admission::Rejected { retry_after } => {
                self.audit.record(&AuditEvent::RateLimited {
                    caller: caller.to_string(),
                    retry_after,
                });
                Err(GatewayError::rate_exceeded(ceil_millis(retry_after)))
            }
        }
    }

    /// Smaller of the requested limit and the tier's hard ceiling
    #[must_use]
    pub fn effective_limit(&self, requested: u64, tier: AccessTier) -> usize {
        bounding::effective_limit(requested, tier, &self.config.result_caps)
    }

    /// Apply the effective limit to raw adapter rows
    #[must_use]
    pub fn bound(&self, raw: RawRows, requested: u64, tier: AccessTier) -> ResultSet {
        bounding::bound(raw, self.effective_limit(requested, tier))
    }

    /// Drop rate-limit windows whose period has ended
    pub fn purge_expired(&self) -> usize {
        self.gate.purge_expired()
    }

    /// Run a request through every stage
    pub async fn handle<A: ExecutionAdapter>(
        &self,
        adapter: &A,
        payload: &Value,
        caller: &str,
        tier: AccessTier,
    ) -> Result<QueryOutcome> {
        let request = self.validate_request(payload, caller)?;
        self.check_admission(caller)?;
        let statement = self.classify(&request)?;
        self.execute(adapter, &request, statement, tier).await
    }

    /// Build and run `SELECT * FROM <table>` for a validated table name
    pub async fn preview_table<A: ExecutionAdapter>(
        &self,
        adapter: &A,
        table: &str,
        limit: Option<u64>,
        caller: &str,
        tier: AccessTier,
    ) -> Result<QueryOutcome> {
        let payload = self.preview_payload(table, limit, caller)?;
        self.handle(adapter, &payload, caller, tier).await
    }

    /// Request payload for a table preview; the table name must be a plain identifier
    pub fn preview_payload(&self, table: &str, limit: Option<u64>, caller: &str) -> Result<Value> {
        let violations = validation::validate_identifier("table", table, &self.config.limits);
        if !violations.is_empty() {
            let verdict = ValidationVerdict::from_violations(violations);
            return Err(self.reject(RejectionStage::Input, caller, table, &verdict));
        }

        let mut payload = Map::new();
        payload.insert("sql".to_string(), Value::String(format!("SELECT * FROM {table}")));
        if let Some(limit) = limit {
            payload.insert("limit".to_string(), Value::from(limit));
        }
        Ok(Value::Object(payload))
    }

    async fn execute<A: ExecutionAdapter>(
        &self,
        adapter: &A,
        request: &QueryRequest,
        statement: ClassifiedStatement,
        tier: AccessTier,
    ) -> Result<QueryOutcome> {
        let limit = self.effective_limit(request.limit, tier);
        // one extra row reveals truncation
        let options = ExecutionOptions::new(request.timeout_ms).with_row_cap(limit.saturating_add(1));

        let started = Instant::now();
        let raw = adapter
            .execute(statement.canonical_text(), &request.params, &options)
            .await
            .inspect_err(|err| {
                self.audit.record(&AuditEvent::ExecutionFailed {
                    caller: request.caller_identity.clone(),
                    message: err.message(),
                });
            })?;
        let elapsed = started.elapsed();

        let result = bounding::bound(raw, limit);
        self.audit.record(&AuditEvent::Executed {
            caller: request.caller_identity.clone(),
            rows: result.rows.len(),
            truncated: result.truncated,
            elapsed,
        });

        Ok(QueryOutcome { statement, result, elapsed })
    }
}

/// Whole milliseconds, rounded up so a client never retries early
fn ceil_millis(duration: Duration) -> u64 {
    let millis = duration.as_millis() + u128::from(duration.subsec_nanos() % 1_000_000 != 0);
    u64::try_from(millis).unwrap_or(u64::MAX)
}
