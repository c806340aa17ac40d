//! Configuration Management
//!
//! This module defines every tunable of the admission pipeline: input limits, the
//! rate-limit window, the statement rule tables, result ceilings, audit settings, and the
//! optional database connection. Nothing in the algorithms is hardcoded; the values below are
//! defaults only.
//!
//! # Configuration Locations
//! - Explicit: `--config <path>` (highest priority, must exist)
//! - Local: `.portcullis/config.json` (team-shareable, per-project)
//! - Global: `~/.config/portcullis/config.json` (per-user)
//!
//! # Resolution Precedence
//! Local and global files are deep-merged, local keys winning over global keys. Any key
//! missing from both falls back to its built-in default, so a file only needs to name what it
//! overrides.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::bounding::AccessTier;
use crate::engine::ConnectionConfig;
use crate::error::{GatewayError, Result};

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Input schema limits
    pub limits: InputLimits,

    /// Admission gate parameters
    pub rate_limit: RateLimitSettings,

    /// Keyword sets, dangerous functions, and injection patterns
    pub rules: RuleTables,

    /// Hard row ceilings per access tier
    pub result_caps: ResultCaps,

    /// Tier applied when the caller does not ask for one
    pub default_tier: AccessTier,

    /// Audit sink settings
    pub audit: AuditSettings,

    /// Database connection used by the CLI and stdio server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<StoredConnection>,
}

/// Shape constraints enforced by the input schema validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputLimits {
    /// Maximum query length in characters
    pub max_query_length: usize,
    pub default_limit: u64,
    pub min_limit: u64,
    pub max_limit: u64,
    pub default_timeout_ms: u64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub max_identifier_length: usize,
    /// Maximum number of bound parameters per request
    pub max_params: usize,
    /// Raw characters that may never appear in query text
    pub forbidden_characters: Vec<char>,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_query_length: 10_000,
            default_limit: 100,
            min_limit: 1,
            max_limit: 1000,
            default_timeout_ms: 30_000,
            min_timeout_ms: 1000,
            max_timeout_ms: 30_000,
            max_identifier_length: 64,
            max_params: 100,
            forbidden_characters: vec!['<', '>', '{', '}'],
        }
    }
}

/// Fixed-window rate limit parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Window duration in seconds
    pub window_secs: u64,

    /// Requests admitted per identity per window
    pub max_requests: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { window_secs: 60, max_requests: 10 }
    }
}

/// Named injection indicator, matched case-insensitively against the full statement text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionPattern {
    /// Short name used in rejection reasons and audit events
    pub name: String,

    /// Regular expression (compiled case-insensitively)
    pub pattern: String,
}

impl InjectionPattern {
    fn new(name: &str, pattern: &str) -> Self {
        Self { name: name.to_string(), pattern: pattern.to_string() }
    }
}

/// Rule tables consumed by the statement classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleTables {
    /// Leading keywords that mark a statement as readonly (the admission whitelist)
    pub readonly_keywords: Vec<String>,

    /// Leading keywords rejected with a specific "forbidden operation" reason
    pub forbidden_keywords: Vec<String>,

    /// Function names rejected when followed by an opening parenthesis
    pub dangerous_functions: Vec<String>,

    /// Injection indicator patterns
    pub injection_patterns: Vec<InjectionPattern>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

impl Default for RuleTables {
    fn default() -> Self {
        Self {
            readonly_keywords: words(&["SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "ANALYZE"]),
            forbidden_keywords: words(&[
                // Data modification
                "INSERT", "UPDATE", "DELETE", "REPLACE", "MERGE", "UPSERT",
                // Schema modification
                "DROP", "CREATE", "ALTER", "TRUNCATE", "RENAME", "COMMENT",
                // Procedures and dynamic SQL
                "CALL", "EXECUTE", "EXEC", "DO", "HANDLER", "PREPARE", "DEALLOCATE",
                // Privileges
                "GRANT", "REVOKE",
                // Locking and session state
                "LOCK", "UNLOCK", "SET", "RESET", "PRAGMA", "ATTACH", "DETACH", "VACUUM",
                // Transaction control
                "BEGIN", "START", "COMMIT", "ROLLBACK", "SAVEPOINT", "RELEASE",
                // File I/O
                "LOAD", "COPY", "IMPORT", "OUTFILE", "DUMPFILE",
                // Backup
                "BACKUP", "RESTORE",
                // Server control
                "SHUTDOWN", "KILL", "FLUSH", "PURGE", "INSTALL", "UNINSTALL",
            ]),
            dangerous_functions: words(&[
                "LOAD_FILE", "SYSTEM", "BENCHMARK", "SLEEP", "PG_SLEEP", "WAITFOR",
                "GET_LOCK", "RELEASE_LOCK", "IS_FREE_LOCK", "IS_USED_LOCK",
                "PG_READ_FILE", "PG_LS_DIR", "LO_IMPORT", "LO_EXPORT",
                "CURRENT_USER", "SESSION_USER", "SYSTEM_USER", "USER",
                "DATABASE", "SCHEMA", "VERSION", "CONNECTION_ID",
            ]),
            injection_patterns: vec![
                InjectionPattern::new("quote", r#"['"`]"#),
                InjectionPattern::new("line comment", r"--"),
                InjectionPattern::new("block comment", r"/\*|\*/"),
                InjectionPattern::new("hash comment", r"#"),
                InjectionPattern::new("statement separator", r";[\s;]*[^\s;]"),
                InjectionPattern::new("UNION SELECT", r"\bunion\s+(all\s+)?select\b"),
                InjectionPattern::new("script tag", r"<\s*/?\s*script"),
                InjectionPattern::new("javascript URI", r"javascript\s*:"),
                InjectionPattern::new("onload handler", r"\bonload\s*="),
                InjectionPattern::new("onerror handler", r"\bonerror\s*="),
                InjectionPattern::new("eval call", r"\beval\s*\("),
            ],
        }
    }
}

/// Hard row ceilings applied on top of the caller-requested limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultCaps {
    pub public: u64,
    pub trusted: u64,
}

impl Default for ResultCaps {
    fn default() -> Self {
        Self { public: 100, trusted: 1000 }
    }
}

impl ResultCaps {
    /// Ceiling for the given tier
    #[must_use]
    pub const fn ceiling(&self, tier: AccessTier) -> u64 {
        match tier {
            AccessTier::Public => self.public,
            AccessTier::Trusted => self.trusted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Characters of query text kept in audit events
    pub query_preview_chars: usize,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self { query_preview_chars: 200 }
    }
}

/// Stored connection configuration
///
/// Similar to `ConnectionConfig` but supports environment variable references
/// for sensitive fields like passwords.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConnection {
    /// Connection configuration
    #[serde(flatten)]
    pub config: ConnectionConfig,

    /// Environment variable name for password (if not storing password directly)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

impl StoredConnection {
    /// Resolve environment variables and return a usable `ConnectionConfig`
    pub fn resolve(&self) -> Result<ConnectionConfig> {
        let mut config = self.config.clone();

        if let Some(env_var) = &self.password_env {
            match std::env::var(env_var) {
                Ok(password) => config.password = Some(password),
                Err(_) => {
                    return Err(GatewayError::config_error(format!(
                        "Environment variable {env_var} not found for password"
                    )));
                }
            }
        }

        Ok(config)
    }
}

impl GatewayConfig {
    /// Check internal consistency of the configuration
    ///
    /// Every problem found is reported, not just the first.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let limits = &self.limits;

        if limits.max_query_length == 0 {
            problems.push("limits.max_query_length must be positive".to_string());
        }
        if limits.min_limit == 0 || limits.min_limit > limits.max_limit {
            problems.push("limits.min_limit must be in [1, max_limit]".to_string());
        }
        if !(limits.min_limit..=limits.max_limit).contains(&limits.default_limit) {
            problems.push("limits.default_limit must be within [min_limit, max_limit]".to_string());
        }
        if limits.min_timeout_ms > limits.max_timeout_ms {
            problems.push("limits.min_timeout_ms must not exceed max_timeout_ms".to_string());
        }
        if !(limits.min_timeout_ms..=limits.max_timeout_ms).contains(&limits.default_timeout_ms) {
            problems.push(
                "limits.default_timeout_ms must be within [min_timeout_ms, max_timeout_ms]"
                    .to_string(),
            );
        }
        if limits.max_identifier_length == 0 {
            problems.push("limits.max_identifier_length must be positive".to_string());
        }
        if self.rate_limit.window_secs == 0 {
            problems.push("rate_limit.window_secs must be positive".to_string());
        }
        if self.rate_limit.max_requests == 0 {
            problems.push("rate_limit.max_requests must be positive".to_string());
        }
        if self.result_caps.public == 0 || self.result_caps.trusted == 0 {
            problems.push("result_caps must be positive".to_string());
        }

        let rules = &self.rules;
        if rules.readonly_keywords.is_empty() {
            problems.push("rules.readonly_keywords must not be empty".to_string());
        }
        for keyword in &rules.readonly_keywords {
            if rules.forbidden_keywords.iter().any(|f| f.eq_ignore_ascii_case(keyword)) {
                problems.push(format!(
                    "keyword {} appears in both readonly_keywords and forbidden_keywords",
                    keyword.to_uppercase()
                ));
            }
        }
        for pattern in &rules.injection_patterns {
            if let Err(e) = regex::RegexBuilder::new(&pattern.pattern).case_insensitive(true).build()
            {
                problems.push(format!("injection pattern '{}' is invalid: {e}", pattern.name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::config_error(problems.join("; ")))
        }
    }

    /// Load configuration with precedence
    ///
    /// An explicit path must exist and is used alone. Otherwise the global file is used as
    /// the base and the local file is merged over it. Missing files are skipped.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let merged = if let Some(path) = explicit {
            if !path.exists() {
                return Err(GatewayError::config_error(format!(
                    "Config file {} does not exist",
                    path.display()
                )));
            }
            read_json(path)?
        } else {
            let mut merged = Value::Object(serde_json::Map::new());
            for path in [global_config_path()?, local_config_path()?] {
                if path.exists() {
                    merge_json(&mut merged, read_json(&path)?);
                }
            }
            merged
        };

        let config: Self = serde_json::from_value(merged)
            .map_err(|e| GatewayError::config_error(format!("Invalid config file format: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                GatewayError::config_error(format!("Could not create config directory: {e}"))
            })?;
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| GatewayError::config_error(format!("Could not serialize config: {e}")))?;

        fs::write(path, contents)
            .map_err(|e| GatewayError::config_error(format!("Could not write config file: {e}")))
    }
}

/// Get path to local config file (`.portcullis/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        GatewayError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".portcullis").join("config.json"))
}

/// Get path to global config file (`~/.config/portcullis/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| GatewayError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("portcullis").join("config.json"))
}

fn read_json(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path)
        .map_err(|e| GatewayError::config_error(format!("Could not read config file: {e}")))?;

    serde_json::from_str(&contents)
        .map_err(|e| GatewayError::config_error(format!("Invalid config file format: {e}")))
}

/// Deep-merge `overlay` into `base`; objects merge key by key, anything else is replaced
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
