//! Input Schema Validation
//!
//! Checks the shape, type, length, and character set of caller-supplied parameters before
//! any SQL-specific reasoning happens. The validator is a pure function of the payload and the
//! configured [`InputLimits`]: malformed input is an expected outcome reported as a
//! [`ValidationVerdict`], never an error.
//!
//! Every field is checked and every violation is reported, so a caller can fix a request in one
//! round trip.

use serde::Serialize;
use serde_json::Value;

use crate::config::InputLimits;

/// A single failed rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Stable rule name (used for audit logging)
    pub rule: &'static str,

    /// Human-readable reason
    pub message: String,
}

impl Violation {
    pub fn new(rule: &'static str, message: impl Into<String>) -> Self {
        Self { rule, message: message.into() }
    }
}

/// Outcome of a validation or classification pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    pub accepted: bool,

    /// One entry per failed rule, in evaluation order
    pub violations: Vec<Violation>,
}

impl ValidationVerdict {
    #[must_use]
    pub const fn accept() -> Self {
        Self { accepted: true, violations: Vec::new() }
    }

    /// Build a verdict from collected violations; empty means accepted
    #[must_use]
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        Self { accepted: violations.is_empty(), violations }
    }

    /// Reason strings in evaluation order
    #[must_use]
    pub fn reasons(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.message.clone()).collect()
    }

    /// Names of the rules that failed, in evaluation order
    #[must_use]
    pub fn rules(&self) -> Vec<&'static str> {
        self.violations.iter().map(|v| v.rule).collect()
    }
}

/// A request that passed input validation, with optional fields defaulted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRequest {
    /// Statement text exactly as submitted
    pub raw_text: String,

    /// Requested row limit, within `[min_limit, max_limit]`
    pub limit: u64,

    /// Execution timeout, within `[min_timeout_ms, max_timeout_ms]`
    pub timeout_ms: u64,

    /// Positional bound parameters (JSON scalars only)
    pub params: Vec<Value>,

    /// Opaque caller key used for rate limiting
    pub caller_identity: String,
}

/// Validate an untyped request payload
///
/// Recognised fields: `sql` (alias `query`), `limit`, `timeout_ms`, `params`.
///
/// # Returns
/// * `Ok(QueryRequest)` with defaults applied when every constraint holds
/// * `Err(ValidationVerdict)` listing every violated constraint otherwise
pub fn validate_request(
    payload: &Value,
    caller_identity: &str,
    limits: &InputLimits,
) -> std::result::Result<QueryRequest, ValidationVerdict> {
    let Some(fields) = payload.as_object() else {
        return Err(ValidationVerdict::from_violations(vec![Violation::new(
            "payload_shape",
            "request must be a JSON object",
        )]));
    };

    let mut violations = Vec::new();

    if caller_identity.trim().is_empty() {
        violations.push(Violation::new("caller_identity", "caller identity is required"));
    }

    let sql = fields.get("sql").or_else(|| fields.get("query"));
    let raw_text = check_query_text(sql, limits, &mut violations);

    let limit = check_bounded_integer(
        fields.get("limit"),
        "limit",
        limits.default_limit,
        (limits.min_limit, limits.max_limit),
        &mut violations,
    );

    let timeout_ms = check_bounded_integer(
        fields.get("timeout_ms"),
        "timeout_ms",
        limits.default_timeout_ms,
        (limits.min_timeout_ms, limits.max_timeout_ms),
        &mut violations,
    );

    let params = check_params(fields.get("params"), limits.max_params, &mut violations);

    match raw_text {
        Some(raw_text) if violations.is_empty() => Ok(QueryRequest {
            raw_text,
            limit,
            timeout_ms,
            params,
            caller_identity: caller_identity.to_string(),
        }),
        _ => Err(ValidationVerdict::from_violations(violations)),
    }
}

fn check_query_text(
    value: Option<&Value>,
    limits: &InputLimits,
    violations: &mut Vec<Violation>,
) -> Option<String> {
    let text = match value {
        None | Some(Value::Null) => {
            violations.push(Violation::new("sql_required", "sql is required"));
            return None;
        }
        Some(Value::String(text)) => text,
        Some(_) => {
            violations.push(Violation::new("sql_type", "sql must be a string"));
            return None;
        }
    };

    let before = violations.len();

    if text.trim().is_empty() {
        violations.push(Violation::new("sql_empty", "sql must not be empty"));
    }

    if text.chars().count() > limits.max_query_length {
        violations.push(Violation::new(
            "sql_length",
            format!("sql exceeds maximum length of {} characters", limits.max_query_length),
        ));
    }

    let found: Vec<String> = limits
        .forbidden_characters
        .iter()
        .filter(|c| text.contains(**c))
        .map(char::to_string)
        .collect();
    if !found.is_empty() {
        violations.push(Violation::new(
            "sql_characters",
            format!("sql contains forbidden characters: {}", found.join(" ")),
        ));
    }

    (violations.len() == before).then(|| text.clone())
}

/// Check an optional integer field; absent or null takes the default
///
/// Out-of-range values are rejected rather than clamped.
fn check_bounded_integer(
    value: Option<&Value>,
    field: &'static str,
    default: u64,
    (min, max): (u64, u64),
    violations: &mut Vec<Violation>,
) -> u64 {
    let value = match value {
        None | Some(Value::Null) => return default,
        Some(value) => value,
    };

    let in_range = |n: u64| (min..=max).contains(&n);

    match value.as_u64() {
        Some(n) if in_range(n) => n,
        Some(_) => {
            violations.push(Violation::new(field, format!("{field} must be between {min} and {max}")));
            default
        }
        None if value.is_i64() => {
            // negative integer
            violations.push(Violation::new(field, format!("{field} must be between {min} and {max}")));
            default
        }
        None => {
            violations.push(Violation::new(field, format!("{field} must be an integer")));
            default
        }
    }
}

fn check_params(
    value: Option<&Value>,
    max_params: usize,
    violations: &mut Vec<Violation>,
) -> Vec<Value> {
    let params = match value {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(params)) => params,
        Some(_) => {
            violations.push(Violation::new("params", "params must be an array"));
            return Vec::new();
        }
    };

    if params.len() > max_params {
        violations.push(Violation::new(
            "params",
            format!("params must contain at most {max_params} values"),
        ));
    }

    for (idx, param) in params.iter().enumerate() {
        if param.is_array() || param.is_object() {
            violations.push(Violation::new(
                "params",
                format!("params[{idx}] must be a scalar (null, boolean, number, or string)"),
            ));
        }
    }

    params.clone()
}

/// Validate a table or column name
///
/// Identifiers must match `^[A-Za-z][A-Za-z0-9_]*$` and fit within
/// `max_identifier_length` characters.
#[must_use]
pub fn validate_identifier(field: &str, name: &str, limits: &InputLimits) -> Vec<Violation> {
    let mut violations = Vec::new();

    if name.chars().count() > limits.max_identifier_length {
        violations.push(Violation::new(
            "identifier_length",
            format!("{field} must be at most {} characters", limits.max_identifier_length),
        ));
    }

    let mut chars = name.chars();
    let well_formed = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !well_formed {
        violations.push(Violation::new(
            "identifier_format",
            format!(
                "{field} must start with a letter and contain only letters, digits, and underscores"
            ),
        ));
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn limits() -> InputLimits {
        InputLimits::default()
    }

    #[test]
    fn test_defaults_applied() {
        let request =
            validate_request(&json!({"sql": "SELECT * FROM users"}), "10.0.0.1", &limits()).unwrap();
        assert_eq!(
            request,
            QueryRequest {
                raw_text: "SELECT * FROM users".to_string(),
                limit: 100,
                timeout_ms: 30_000,
                params: Vec::new(),
                caller_identity: "10.0.0.1".to_string(),
            }
        );
    }

    #[test]
    fn test_query_alias_accepted() {
        let request = validate_request(&json!({"query": "SHOW TABLES"}), "c", &limits()).unwrap();
        assert_eq!(request.raw_text, "SHOW TABLES");
    }

    #[test]
    fn test_limit_out_of_range_rejected_not_clamped() {
        let verdict =
            validate_request(&json!({"sql": "SELECT 1", "limit": 5000}), "c", &limits()).unwrap_err();
        assert!(!verdict.accepted);
        assert_eq!(verdict.reasons(), vec!["limit must be between 1 and 1000".to_string()]);

        let verdict =
            validate_request(&json!({"sql": "SELECT 1", "limit": 0}), "c", &limits()).unwrap_err();
        assert_eq!(verdict.rules(), vec!["limit"]);

        let verdict =
            validate_request(&json!({"sql": "SELECT 1", "limit": -3}), "c", &limits()).unwrap_err();
        assert_eq!(verdict.reasons(), vec!["limit must be between 1 and 1000".to_string()]);
    }

    #[test]
    fn test_limit_boundaries_accepted() {
        for limit in [1, 1000] {
            let request =
                validate_request(&json!({"sql": "SELECT 1", "limit": limit}), "c", &limits())
                    .unwrap();
            assert_eq!(request.limit, limit);
        }
    }

    #[test]
    fn test_non_integer_limit() {
        let verdict =
            validate_request(&json!({"sql": "SELECT 1", "limit": "10"}), "c", &limits()).unwrap_err();
        assert_eq!(verdict.reasons(), vec!["limit must be an integer".to_string()]);

        let verdict =
            validate_request(&json!({"sql": "SELECT 1", "limit": 2.5}), "c", &limits()).unwrap_err();
        assert_eq!(verdict.reasons(), vec!["limit must be an integer".to_string()]);
    }

    #[test]
    fn test_timeout_range() {
        let verdict =
            validate_request(&json!({"sql": "SELECT 1", "timeout_ms": 999}), "c", &limits())
                .unwrap_err();
        assert_eq!(verdict.reasons(), vec!["timeout_ms must be between 1000 and 30000".to_string()]);

        let request =
            validate_request(&json!({"sql": "SELECT 1", "timeout_ms": 1000}), "c", &limits())
                .unwrap();
        assert_eq!(request.timeout_ms, 1000);
    }

    #[test]
    fn test_all_violations_reported() {
        let payload = json!({
            "sql": "SELECT <b> FROM t",
            "limit": 5000,
            "timeout_ms": 60_000,
            "params": {"id": 1},
        });
        let verdict = validate_request(&payload, "", &limits()).unwrap_err();
        assert_eq!(
            verdict.rules(),
            vec!["caller_identity", "sql_characters", "limit", "timeout_ms", "params"]
        );
        assert!(verdict.reasons()[1].contains("< >"));
    }

    #[test]
    fn test_missing_and_empty_sql() {
        let verdict = validate_request(&json!({}), "c", &limits()).unwrap_err();
        assert_eq!(verdict.reasons(), vec!["sql is required".to_string()]);

        let verdict = validate_request(&json!({"sql": "   "}), "c", &limits()).unwrap_err();
        assert_eq!(verdict.reasons(), vec!["sql must not be empty".to_string()]);

        let verdict = validate_request(&json!({"sql": 42}), "c", &limits()).unwrap_err();
        assert_eq!(verdict.reasons(), vec!["sql must be a string".to_string()]);
    }

    #[test]
    fn test_sql_length_counts_characters() {
        let mut small = limits();
        small.max_query_length = 10;

        let ok = validate_request(&json!({"sql": "SELECT ééé"}), "c", &small);
        assert!(ok.is_ok(), "10 characters should fit even though it is more than 10 bytes");

        let verdict = validate_request(&json!({"sql": "SELECT 1234"}), "c", &small).unwrap_err();
        assert_eq!(verdict.rules(), vec!["sql_length"]);
    }

    #[test]
    fn test_non_object_payload() {
        let verdict = validate_request(&json!("SELECT 1"), "c", &limits()).unwrap_err();
        assert_eq!(verdict.rules(), vec!["payload_shape"]);
    }

    #[test]
    fn test_params_validation() {
        let request = validate_request(
            &json!({"sql": "SELECT * FROM t WHERE id = ?", "params": [1, "a", null, true]}),
            "c",
            &limits(),
        )
        .unwrap();
        assert_eq!(request.params.len(), 4);

        let verdict = validate_request(
            &json!({"sql": "SELECT 1", "params": [[1], 2, {"x": 1}]}),
            "c",
            &limits(),
        )
        .unwrap_err();
        assert_eq!(verdict.violations.len(), 2);
        assert!(verdict.reasons()[0].starts_with("params[0]"));
        assert!(verdict.reasons()[1].starts_with("params[2]"));

        let mut few = limits();
        few.max_params = 1;
        let verdict =
            validate_request(&json!({"sql": "SELECT 1", "params": [1, 2]}), "c", &few).unwrap_err();
        assert_eq!(verdict.reasons(), vec!["params must contain at most 1 values".to_string()]);
    }

    #[test]
    fn test_identifier_rules() {
        assert!(validate_identifier("table", "users", &limits()).is_empty());
        assert!(validate_identifier("table", "Order_Items2", &limits()).is_empty());

        for bad in ["", "1users", "_users", "users;", "user name", "users-x", "tbl\u{e9}"] {
            let violations = validate_identifier("table", bad, &limits());
            assert_eq!(violations.len(), 1, "{bad:?} should be rejected");
            assert_eq!(violations[0].rule, "identifier_format");
        }

        let long = "a".repeat(65);
        let violations = validate_identifier("table", &long, &limits());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, "identifier_length");
        assert!(validate_identifier("table", &"a".repeat(64), &limits()).is_empty());
    }

    #[test]
    fn test_verdict_helpers() {
        assert!(ValidationVerdict::accept().accepted);
        assert!(ValidationVerdict::from_violations(Vec::new()).accepted);
        let verdict = ValidationVerdict::from_violations(vec![Violation::new("x", "bad")]);
        assert!(!verdict.accepted);
        assert_eq!(verdict.reasons(), vec!["bad".to_string()]);
    }
}
