//! `SQLite` Execution Adapter
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver); each call runs on tokio's blocking pool
//! - Connections are opened with `SQLITE_OPEN_READ_ONLY`, and statements that SQLite itself
//!   reports as writing are refused before the first step
//! - Timeouts: the call is abandoned at the deadline and the running statement is interrupted
//!   through the connection's interrupt handle
//! - Parameters bind as `?` placeholders; booleans become 0/1
//! - BLOB data is Base64-encoded for JSON safety

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags, Row};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::engine::{
    timeout_error, ConnectionConfig, DatabaseType, ExecutionAdapter, ExecutionOptions, RawRows,
};
use crate::error::{GatewayError, Result};

/// `SQLite` adapter bound to one database file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteAdapter {
    file: PathBuf,
}

impl SqliteAdapter {
    #[must_use]
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }

    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        if config.engine != DatabaseType::SQLite {
            return Err(GatewayError::config_error(format!(
                "Expected SQLite engine, got {}",
                config.engine
            )));
        }

        let file = config
            .file
            .as_ref()
            .ok_or_else(|| GatewayError::config_error("SQLite requires 'file' parameter"))?;

        Ok(Self::new(file.clone()))
    }

    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }
}

impl ExecutionAdapter for SqliteAdapter {
    fn engine(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn execute(
        &self,
        sql: &str,
        params: &[Value],
        options: &ExecutionOptions,
    ) -> Result<RawRows> {
        let conn = open_connection(&self.file)?;
        conn.busy_timeout(options.timeout()).map_err(|e| {
            GatewayError::engine_error("sqlite", format!("Failed to set timeout: {e}"))
        })?;
        let interrupt = conn.get_interrupt_handle();

        let sql = sql.to_owned();
        let params = params.to_vec();
        let opts = *options;
        let task = tokio::task::spawn_blocking(move || execute_query(&conn, &sql, &params, &opts));

        match tokio::time::timeout(options.timeout(), task).await {
            Ok(joined) => joined.map_err(|e| {
                GatewayError::engine_error("sqlite", format!("Query task failed: {e}"))
            })?,
            Err(_) => {
                interrupt.interrupt();
                Err(timeout_error(options.timeout_ms))
            }
        }
    }
}

/// Open a readonly connection; a missing file is a connection failure, never a new database
fn open_connection(path: &Path) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    Connection::open_with_flags(path, flags).map_err(|e| {
        GatewayError::connection_failed(format!("Failed to open SQLite database: {e}"))
    })
}

fn execute_query(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    options: &ExecutionOptions,
) -> Result<RawRows> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| GatewayError::execution_failed(format!("Failed to prepare query: {e}")))?;

    if !stmt.readonly() {
        return Err(GatewayError::execution_failed("Statement would modify the database"));
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();
    let width = columns.len();

    let mut rows = stmt
        .query(params_from_iter(params.iter().map(json_to_sql)))
        .map_err(|e| GatewayError::execution_failed(format!("Failed to execute query: {e}")))?;

    let mut data = Vec::new();
    while options.wants_more(data.len()) {
        let next = rows
            .next()
            .map_err(|e| GatewayError::execution_failed(format!("Failed to fetch row: {e}")))?;
        let Some(row) = next else { break };
        data.push(row_to_json(width, row)?);
    }

    Ok(RawRows { columns, rows: data })
}

/// Convert a bound JSON scalar to a `SQLite` value
fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => SqlValue::Integer(i),
            (None, Some(f)) => SqlValue::Real(f),
            (None, None) => SqlValue::Text(n.to_string()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Convert a `SQLite` row to a JSON-safe `Vec`
fn row_to_json(width: usize, row: &Row) -> Result<Vec<Value>> {
    (0..width).map(|idx| sqlite_value_to_json(row, idx)).collect()
}

fn sqlite_value_to_json(row: &Row, idx: usize) -> Result<Value> {
    let value_ref = row
        .get_ref(idx)
        .map_err(|e| GatewayError::execution_failed(format!("Failed to read column {idx}: {e}")))?;

    Ok(match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        // NaN/Infinity have no JSON form
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn fixture(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("portcullis_sqlite_{name}.db"));
        let _ = std::fs::remove_file(&path);

        let conn = Connection::open(&path).expect("Failed to create temp database");
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, score REAL, avatar BLOB);
             INSERT INTO users (name, score, avatar) VALUES ('Alice', 9.5, x'010203');
             INSERT INTO users (name, score, avatar) VALUES ('Bob', NULL, NULL);
             INSERT INTO users (name, score, avatar) VALUES ('Carol', 7.25, NULL);",
        )
        .expect("Failed to seed fixture");

        path
    }

    #[tokio::test]
    async fn test_select_all_types() {
        let path = fixture("types");
        let adapter = SqliteAdapter::new(&path);

        let raw = adapter
            .execute(
                "SELECT id, name, score, avatar FROM users ORDER BY id",
                &[],
                &ExecutionOptions::new(5000),
            )
            .await
            .unwrap();

        assert_eq!(raw.columns, vec!["id", "name", "score", "avatar"]);
        assert_eq!(raw.rows.len(), 3);
        assert_eq!(raw.rows[0], vec![json!(1), json!("Alice"), json!(9.5), json!("AQID")]);
        assert_eq!(raw.rows[1], vec![json!(2), json!("Bob"), json!(null), json!(null)]);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_bound_parameters() {
        let path = fixture("params");
        let adapter = SqliteAdapter::new(&path);

        let raw = adapter
            .execute(
                "SELECT name FROM users WHERE name = ? OR id = ? ORDER BY id",
                &[json!("Carol"), json!(1)],
                &ExecutionOptions::new(5000),
            )
            .await
            .unwrap();
        let names: Vec<_> = raw.rows.iter().map(|r| r[0].clone()).collect();
        assert_eq!(names, vec![json!("Alice"), json!("Carol")]);

        // a hostile value stays a value
        let raw = adapter
            .execute(
                "SELECT name FROM users WHERE name = ?",
                &[json!("x' OR '1'='1")],
                &ExecutionOptions::new(5000),
            )
            .await
            .unwrap();
        assert!(raw.rows.is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_row_cap_stops_fetching() {
        let path = fixture("row_cap");
        let adapter = SqliteAdapter::new(&path);

        let raw = adapter
            .execute("SELECT * FROM users", &[], &ExecutionOptions::new(5000).with_row_cap(2))
            .await
            .unwrap();
        assert_eq!(raw.rows.len(), 2);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_write_refused() {
        let path = fixture("write_refused");
        let adapter = SqliteAdapter::new(&path);

        for sql in ["DELETE FROM users", "INSERT INTO users (name) VALUES ('Eve')", "DROP TABLE users"] {
            let err = adapter.execute(sql, &[], &ExecutionOptions::new(5000)).await.unwrap_err();
            assert_eq!(err.error_code(), "EXECUTION_FAILED", "{sql}");
        }

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 3);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_timeout_interrupts_statement() {
        let path = fixture("timeout");
        let adapter = SqliteAdapter::new(&path);

        let endless = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) \
                       SELECT COUNT(*) FROM c";
        let started = std::time::Instant::now();
        let err = adapter.execute(endless, &[], &ExecutionOptions::new(100)).await.unwrap_err();

        assert_eq!(err, GatewayError::execution_failed("Query exceeded timeout of 100ms"));
        assert!(started.elapsed() < Duration::from_secs(5));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_missing_file_is_connection_failure() {
        let adapter = SqliteAdapter::new("/nonexistent/portcullis/missing.db");
        let err = adapter.execute("SELECT 1", &[], &ExecutionOptions::new(1000)).await.unwrap_err();
        assert_eq!(err.error_code(), "CONNECTION_FAILED");
    }

    #[tokio::test]
    async fn test_engine_error_passed_through() {
        let path = fixture("no_table");
        let adapter = SqliteAdapter::new(&path);

        let err = adapter
            .execute("SELECT * FROM missing", &[], &ExecutionOptions::new(1000))
            .await
            .unwrap_err();
        assert!(err.message().contains("no such table: missing"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_from_config_wrong_engine() {
        let mut config = ConnectionConfig::sqlite(PathBuf::from("app.db"));
        config.engine = DatabaseType::MySQL;
        let err = SqliteAdapter::from_config(&config).unwrap_err();
        assert!(err.message().contains("Expected SQLite engine"));
    }

    #[test]
    fn test_json_to_sql() {
        assert_eq!(json_to_sql(&json!(true)), SqlValue::Integer(1));
        assert_eq!(json_to_sql(&json!(42)), SqlValue::Integer(42));
        assert_eq!(json_to_sql(&json!(1.5)), SqlValue::Real(1.5));
        assert_eq!(json_to_sql(&json!("a")), SqlValue::Text("a".to_string()));
        assert_eq!(json_to_sql(&json!(null)), SqlValue::Null);
    }
}
