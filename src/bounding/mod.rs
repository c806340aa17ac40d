//! Result Bounding
//!
//! Caps the row sequence handed back to callers and flags truncation. Bounding never looks
//! inside a row: only the length of the sequence matters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ResultCaps;
use crate::engine::RawRows;

/// Access tier, selecting the hard row ceiling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessTier {
    #[default]
    Public,
    Trusted,
}

impl AccessTier {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Trusted => "trusted",
        }
    }
}

/// Bounded result handed back to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    /// Column names in result order
    pub columns: Vec<String>,

    /// Rows, each in column order
    pub rows: Vec<Vec<Value>>,

    /// Whether rows were dropped to honour the limit
    pub truncated: bool,
}

/// Smaller of the requested limit and the tier's ceiling
#[must_use]
pub fn effective_limit(requested: u64, tier: AccessTier, caps: &ResultCaps) -> usize {
    let limit = requested.min(caps.ceiling(tier));
    usize::try_from(limit).unwrap_or(usize::MAX)
}

/// Truncate `raw` to `limit` rows
///
/// `truncated` is set iff the raw sequence held more than `limit` rows.
#[must_use]
pub fn bound(raw: RawRows, limit: usize) -> ResultSet {
    let RawRows { columns, mut rows } = raw;
    let truncated = rows.len() > limit;
    rows.truncate(limit);
    ResultSet { columns, rows, truncated }
}
