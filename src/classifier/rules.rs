//! Statement Rules
//!
//! Each rule inspects a [`StatementText`] and contributes zero or more [`Violation`]s. Rules
//! never stop evaluation of other rules, so a rejected statement carries every reason at once.

use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;

use super::StatementText;
use crate::config::InjectionPattern;
use crate::error::{GatewayError, Result};
use crate::validation::Violation;

/// A single admission rule
pub trait StatementRule: Send + Sync {
    /// Stable rule name, reported in audit events
    fn name(&self) -> &'static str;

    /// Append a violation for every problem found
    fn check(&self, statement: &StatementText<'_>, violations: &mut Vec<Violation>);
}

fn compile(pattern: &str, what: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| GatewayError::config_error(format!("Invalid {what} pattern: {e}")))
}

/// Whitelist of leading keywords, with a blacklist for more specific messages
///
/// Unknown verbs are rejected; the forbidden set only changes the wording.
pub struct KeywordRule {
    readonly: BTreeSet<String>,
    forbidden: BTreeSet<String>,
    allowed_list: String,
}

impl KeywordRule {
    pub fn new(readonly: &[String], forbidden: &[String]) -> Self {
        let readonly: BTreeSet<String> = readonly.iter().map(|k| k.to_uppercase()).collect();
        let forbidden = forbidden.iter().map(|k| k.to_uppercase()).collect();
        let allowed_list = readonly.iter().cloned().collect::<Vec<_>>().join(", ");
        Self { readonly, forbidden, allowed_list }
    }

    /// Whether `keyword` (already uppercase) is an allowed leading verb
    #[must_use]
    pub fn is_readonly(&self, keyword: &str) -> bool {
        self.readonly.contains(keyword)
    }
}

impl StatementRule for KeywordRule {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn check(&self, statement: &StatementText<'_>, violations: &mut Vec<Violation>) {
        let keyword = statement.first_keyword.as_str();
        if self.forbidden.contains(keyword) {
            violations.push(Violation::new(self.name(), format!("Forbidden operation: {keyword}")));
        } else if !self.readonly.contains(keyword) {
            violations.push(Violation::new(
                self.name(),
                format!("Query must start with a readonly operation ({})", self.allowed_list),
            ));
        }
    }
}

/// Injection indicator scan over the full original text
pub struct InjectionPatternRule {
    patterns: Vec<(String, Regex)>,
}

impl InjectionPatternRule {
    pub fn new(patterns: &[InjectionPattern]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Ok((p.name.clone(), compile(&p.pattern, "injection")?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }
}

impl StatementRule for InjectionPatternRule {
    fn name(&self) -> &'static str {
        "injection_pattern"
    }

    fn check(&self, statement: &StatementText<'_>, violations: &mut Vec<Violation>) {
        for (name, pattern) in &self.patterns {
            if pattern.is_match(statement.original) {
                violations.push(Violation::new(
                    self.name(),
                    format!("Potential SQL injection pattern detected: {name}"),
                ));
            }
        }
    }
}

/// Dangerous function calls, matched only as `NAME (`
///
/// Word boundaries keep identifiers such as `last_sleep_at` or `my_sleep(` from matching.
pub struct DangerousFunctionRule {
    functions: Vec<(String, Regex)>,
}

impl DangerousFunctionRule {
    pub fn new(functions: &[String]) -> Result<Self> {
        let functions = functions
            .iter()
            .map(|f| {
                let pattern = format!(r"\b{}\s*\(", regex::escape(f));
                Ok((f.to_uppercase(), compile(&pattern, "dangerous function")?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { functions })
    }
}

impl StatementRule for DangerousFunctionRule {
    fn name(&self) -> &'static str {
        "dangerous_function"
    }

    fn check(&self, statement: &StatementText<'_>, violations: &mut Vec<Violation>) {
        for (name, pattern) in &self.functions {
            if pattern.is_match(statement.original) {
                violations.push(Violation::new(
                    self.name(),
                    format!("Dangerous function not allowed: {name}"),
                ));
            }
        }
    }
}

/// No `;` anywhere except a single trailing one
pub struct MultiStatementRule;

impl StatementRule for MultiStatementRule {
    fn name(&self) -> &'static str {
        "multiple_statements"
    }

    fn check(&self, statement: &StatementText<'_>, violations: &mut Vec<Violation>) {
        let text = statement.original.trim_end();
        let body = text.strip_suffix(';').unwrap_or(text);
        if body.contains(';') {
            violations.push(Violation::new(self.name(), "Multiple statements are not allowed"));
        }
    }
}

/// Structural check for `SELECT`
///
/// A `SELECT` must have a `FROM` clause, name the `DUAL` pseudo-table, or be a simple
/// expression list: literals, placeholders, identifiers, and single-level function calls
/// joined by arithmetic operators, each with an optional alias. Call arguments may not be
/// calls themselves. Other readonly verbs are not checked.
pub struct SelectShapeRule {
    from_clause: Regex,
    pseudo_table: Regex,
    simple_expression: Regex,
}

impl SelectShapeRule {
    pub fn new() -> Result<Self> {
        let ident = r"[A-Za-z_][A-Za-z0-9_]*";
        let atom = format!(r"[-+]?(?:\d+(?:\.\d+)?|{ident}(?:\.{ident})?|\?|\$\d+)");
        let call = format!(r"{ident}\s*\(\s*(?:{atom}(?:\s*,\s*{atom})*)?\s*\)");
        let term = format!(r"(?:[-+]?{call}|{atom})");
        let expr = format!(r"{term}(?:\s*[-+*/%]\s*{term})*");
        let item = format!(r"{expr}(?:\s+(?:AS\s+)?{ident})?");
        let simple = format!(r"^SELECT\s+(?:DISTINCT\s+)?{item}(?:\s*,\s*{item})*$");

        Ok(Self {
            from_clause: compile(r"\bFROM\b", "structure")?,
            pseudo_table: compile(r"\bDUAL\b", "structure")?,
            simple_expression: compile(&simple, "structure")?,
        })
    }

    fn is_well_formed(&self, canonical: &str) -> bool {
        self.from_clause.is_match(canonical)
            || self.pseudo_table.is_match(canonical)
            || self.simple_expression.is_match(canonical)
    }
}

impl StatementRule for SelectShapeRule {
    fn name(&self) -> &'static str {
        "select_structure"
    }

    fn check(&self, statement: &StatementText<'_>, violations: &mut Vec<Violation>) {
        if statement.first_keyword == "SELECT" && !self.is_well_formed(&statement.canonical) {
            violations.push(Violation::new(
                self.name(),
                "Malformed SELECT structure: expected a FROM clause or a simple expression",
            ));
        }
    }
}
