//! Statement Classification and Sanitization
//!
//! Decides whether a free-form statement may run and computes the canonical text that is
//! executed and logged.
//!
//! # Classification Strategy
//! - Whitelist first: the leading keyword must be a configured readonly verb; unknown verbs are
//!   rejected, forbidden verbs get a more specific message
//! - Independent rule objects (keyword, injection patterns, dangerous functions, multiple
//!   statements, `SELECT` structure) evaluated in a fixed order, all of them, every time
//! - Keyword matching uses an uppercase copy; the canonical text keeps the caller's casing
//!
//! # Canonical Form
//! Whitespace runs collapse to single spaces and trailing separators are stripped.
//! Canonicalization is idempotent.

pub mod rules;

use serde::Serialize;

use crate::config::RuleTables;
use crate::error::Result;
use crate::validation::{ValidationVerdict, Violation};

pub use rules::{
    DangerousFunctionRule, InjectionPatternRule, KeywordRule, MultiStatementRule,
    SelectShapeRule, StatementRule,
};

/// An admitted statement
///
/// Only the classifier constructs these, and they cannot be modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedStatement {
    canonical_text: String,
    is_readonly: bool,
    first_keyword: String,
}

impl ClassifiedStatement {
    /// Text handed to the execution adapter
    #[must_use]
    pub fn canonical_text(&self) -> &str {
        &self.canonical_text
    }

    #[must_use]
    pub const fn is_readonly(&self) -> bool {
        self.is_readonly
    }

    /// Leading keyword, uppercase
    #[must_use]
    pub fn first_keyword(&self) -> &str {
        &self.first_keyword
    }
}

/// A statement prepared for rule evaluation
#[derive(Debug, Clone)]
pub struct StatementText<'a> {
    /// Trimmed original text
    pub original: &'a str,

    /// Uppercase copy used for keyword matching
    pub upper: String,

    /// Leading keyword (uppercase)
    pub first_keyword: String,

    /// Canonical form of `original`
    pub canonical: String,
}

impl<'a> StatementText<'a> {
    #[must_use]
    pub fn new(text: &'a str) -> Self {
        let original = text.trim();
        let upper = original.to_uppercase();
        let first_keyword = leading_keyword(&upper);
        let canonical = canonicalize(original);
        Self { original, upper, first_keyword, canonical }
    }
}

/// Extract the leading keyword from uppercase text
///
/// Takes the first whitespace-delimited token and keeps its leading word characters, so
/// `SELECT*FROM t` and `SELECT;` both yield `SELECT`.
fn leading_keyword(upper: &str) -> String {
    let token = upper.split_whitespace().next().unwrap_or_default();
    let word: String =
        token.chars().take_while(|c| c.is_alphanumeric() || *c == '_').collect();
    if word.is_empty() {
        token.to_string()
    } else {
        word
    }
}

/// Collapse whitespace runs and strip trailing statement separators
#[must_use]
pub fn canonicalize(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_end_matches(|c: char| c == ';' || c.is_whitespace()).to_string()
}

/// Ordered composition of statement rules
pub struct Classifier {
    keywords: KeywordRule,
    rules: Vec<Box<dyn StatementRule>>,
}

impl Classifier {
    /// Build the standard rule chain from configured rule tables
    ///
    /// Fails only if a configured pattern does not compile.
    pub fn from_tables(tables: &RuleTables) -> Result<Self> {
        let rules: Vec<Box<dyn StatementRule>> = vec![
            Box::new(InjectionPatternRule::new(&tables.injection_patterns)?),
            Box::new(DangerousFunctionRule::new(&tables.dangerous_functions)?),
            Box::new(MultiStatementRule),
            Box::new(SelectShapeRule::new()?),
        ];

        Ok(Self {
            keywords: KeywordRule::new(&tables.readonly_keywords, &tables.forbidden_keywords),
            rules,
        })
    }

    /// Build a classifier with a custom rule chain after the keyword rule
    #[must_use]
    pub fn with_rules(keywords: KeywordRule, rules: Vec<Box<dyn StatementRule>>) -> Self {
        Self { keywords, rules }
    }

    /// Names of the rules in evaluation order
    #[must_use]
    pub fn rule_names(&self) -> Vec<&'static str> {
        std::iter::once(self.keywords.name()).chain(self.rules.iter().map(|r| r.name())).collect()
    }

    /// Classify a statement
    ///
    /// # Returns
    /// * `Ok(ClassifiedStatement)` when every rule passes
    /// * `Err(ValidationVerdict)` with every accumulated reason otherwise
    pub fn classify(&self, text: &str) -> std::result::Result<ClassifiedStatement, ValidationVerdict> {
        let statement = StatementText::new(text);

        if statement.original.is_empty() {
            return Err(ValidationVerdict::from_violations(vec![Violation::new(
                "empty",
                "Query cannot be empty",
            )]));
        }

        let mut violations = Vec::new();
        self.keywords.check(&statement, &mut violations);
        for rule in &self.rules {
            rule.check(&statement, &mut violations);
        }

        if !violations.is_empty() {
            return Err(ValidationVerdict::from_violations(violations));
        }

        Ok(ClassifiedStatement {
            is_readonly: self.keywords.is_readonly(&statement.first_keyword),
            first_keyword: statement.first_keyword,
            canonical_text: statement.canonical,
        })
    }
}
