//! Execution Adapters
//!
//! The admission pipeline hands a canonical statement, its bound parameters, and a timeout to an
//! [`ExecutionAdapter`] and gets raw rows back. Each engine (`PostgreSQL`, `MySQL`, `SQLite`)
//! provides one adapter behind its own cargo feature.
//!
//! # Adapter Contract
//! - Caller-influenced values only ever travel as bound parameters, never spliced into the text
//! - Sessions are opened readonly at the engine level, independent of the classifier
//! - Exceeding the timeout surfaces as [`GatewayError::ExecutionFailed`], never a hang
//! - At most `row_cap` rows are materialised when a cap is given
//!
//! # Stateless Design
//! Connections are opened, used, and closed within each call.
//!
//! # Engine Isolation
//! Each engine implementation is completely independent.
//! No shared SQL helpers or cross-engine abstractions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GatewayError, Result};

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

/// Supported database engine types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// `PostgreSQL` database
    Postgres,
    /// `MySQL` database (includes `MariaDB`)
    MySQL,
    /// `SQLite` database
    SQLite,
}

impl DatabaseType {
    /// Get the engine name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Connection configuration for database engines
///
/// Fields are engine-specific (e.g., `file` only applies to `SQLite`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database engine type
    pub engine: DatabaseType,

    /// Hostname (for postgres/mysql)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Port number (for postgres/mysql)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Username (for postgres/mysql)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Password (for postgres/mysql)
    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Database name (for postgres/mysql)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Database file path (for sqlite)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl ConnectionConfig {
    /// Create a new `PostgreSQL` connection config
    #[must_use]
    pub const fn postgres(
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    ) -> Self {
        Self {
            engine: DatabaseType::Postgres,
            host: Some(host),
            port: Some(port),
            user: Some(user),
            password: Some(password),
            database: Some(database),
            file: None,
        }
    }

    /// Create a new `MySQL` connection config
    #[must_use]
    pub const fn mysql(
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    ) -> Self {
        Self {
            engine: DatabaseType::MySQL,
            host: Some(host),
            port: Some(port),
            user: Some(user),
            password: Some(password),
            database: Some(database),
            file: None,
        }
    }

    /// Create a new `SQLite` connection config
    #[must_use]
    pub const fn sqlite(file: PathBuf) -> Self {
        Self {
            engine: DatabaseType::SQLite,
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            file: Some(file),
        }
    }
}

/// Unbounded rows as produced by an adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRows {
    /// Column names in result order
    pub columns: Vec<String>,

    /// Rows, each in column order
    pub rows: Vec<Vec<Value>>,
}

/// Per-call execution settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Deadline for the whole call, connection included
    pub timeout_ms: u64,

    /// Stop fetching after this many rows
    pub row_cap: Option<usize>,
}

impl ExecutionOptions {
    #[must_use]
    pub const fn new(timeout_ms: u64) -> Self {
        Self { timeout_ms, row_cap: None }
    }

    #[must_use]
    pub const fn with_row_cap(mut self, row_cap: usize) -> Self {
        self.row_cap = Some(row_cap);
        self
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether another row may be fetched after `fetched` rows
    #[must_use]
    pub fn wants_more(&self, fetched: usize) -> bool {
        self.row_cap.map_or(true, |cap| fetched < cap)
    }
}

/// Error reported when an adapter call runs past its deadline
#[must_use]
pub fn timeout_error(timeout_ms: u64) -> GatewayError {
    GatewayError::execution_failed(format!("Query exceeded timeout of {timeout_ms}ms"))
}

/// Executes admitted statements against a database
pub trait ExecutionAdapter: Send + Sync {
    /// Engine served by this adapter
    fn engine(&self) -> DatabaseType;

    /// Run `sql` with positional `params` and return raw rows
    ///
    /// `params` hold JSON scalars only; they are bound, never interpolated.
    fn execute(
        &self,
        sql: &str,
        params: &[Value],
        options: &ExecutionOptions,
    ) -> impl std::future::Future<Output = Result<RawRows>> + Send;
}

/// Adapter selected from a [`ConnectionConfig`] at runtime
#[derive(Debug, Clone)]
pub enum ConnectionAdapter {
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteAdapter),

    #[cfg(feature = "postgres")]
    Postgres(postgres::PostgresAdapter),

    #[cfg(feature = "mysql")]
    MySql(mysql::MySqlAdapter),
}

impl ConnectionAdapter {
    /// Build the adapter for `config.engine`
    ///
    /// Fails with a configuration error when a required connection field is missing or the
    /// engine was compiled out.
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        match config.engine {
            #[cfg(feature = "sqlite")]
            DatabaseType::SQLite => Ok(Self::Sqlite(sqlite::SqliteAdapter::from_config(config)?)),

            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => {
                Ok(Self::Postgres(postgres::PostgresAdapter::from_config(config)?))
            }

            #[cfg(feature = "mysql")]
            DatabaseType::MySQL => Ok(Self::MySql(mysql::MySqlAdapter::from_config(config)?)),

            #[allow(unreachable_patterns)]
            other => Err(GatewayError::config_error(format!(
                "Engine {other} is not enabled in this build"
            ))),
        }
    }
}

impl ExecutionAdapter for ConnectionAdapter {
    fn engine(&self) -> DatabaseType {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(adapter) => adapter.engine(),
            #[cfg(feature = "postgres")]
            Self::Postgres(adapter) => adapter.engine(),
            #[cfg(feature = "mysql")]
            Self::MySql(adapter) => adapter.engine(),
        }
    }

    async fn execute(
        &self,
        sql: &str,
        params: &[Value],
        options: &ExecutionOptions,
    ) -> Result<RawRows> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(adapter) => adapter.execute(sql, params, options).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(adapter) => adapter.execute(sql, params, options).await,
            #[cfg(feature = "mysql")]
            Self::MySql(adapter) => adapter.execute(sql, params, options).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_serialization() {
        assert_eq!(serde_json::to_string(&DatabaseType::Postgres).unwrap(), r#""postgres""#);
        assert_eq!(serde_json::to_string(&DatabaseType::MySQL).unwrap(), r#""mysql""#);
        assert_eq!(serde_json::to_string(&DatabaseType::SQLite).unwrap(), r#""sqlite""#);
    }

    #[test]
    fn test_connection_config_constructors() {
        let pg_config = ConnectionConfig::postgres(
            "localhost".to_string(),
            5432,
            "user".to_string(),
            "pass".to_string(),
            "db".to_string(),
        );
        assert_eq!(pg_config.engine, DatabaseType::Postgres);
        assert_eq!(pg_config.port, Some(5432));

        let mysql_config = ConnectionConfig::mysql(
            "localhost".to_string(),
            3306,
            "user".to_string(),
            "pass".to_string(),
            "db".to_string(),
        );
        assert_eq!(mysql_config.engine, DatabaseType::MySQL);
        assert_eq!(mysql_config.port, Some(3306));

        let sqlite_config = ConnectionConfig::sqlite(PathBuf::from("/tmp/test.db"));
        assert_eq!(sqlite_config.engine, DatabaseType::SQLite);
        assert!(sqlite_config.file.is_some());
    }

    #[test]
    fn test_password_never_serialized_when_absent() {
        let json = serde_json::to_value(ConnectionConfig::sqlite(PathBuf::from("app.db"))).unwrap();
        assert_eq!(json, serde_json::json!({"engine": "sqlite", "file": "app.db"}));
    }

    #[test]
    fn test_row_cap() {
        let options = ExecutionOptions::new(1000);
        assert!(options.wants_more(usize::MAX - 1));

        let options = options.with_row_cap(2);
        assert!(options.wants_more(1));
        assert!(!options.wants_more(2));
        assert_eq!(options.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_timeout_error_message() {
        let err = timeout_error(1500);
        assert_eq!(err.error_code(), "EXECUTION_FAILED");
        assert!(err.message().contains("Query exceeded timeout of 1500ms"));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_adapter_from_config_missing_file() {
        let config = ConnectionConfig {
            engine: DatabaseType::SQLite,
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            file: None,
        };
        let err = ConnectionAdapter::from_config(&config).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }
}
