//! `PostgreSQL` Execution Adapter
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` (async driver, requires tokio runtime)
//! - Sessions start with `default_transaction_read_only=on` and a server-side
//!   `statement_timeout` matching the call's deadline
//! - Each call runs inside a throwaway transaction so rows can be pulled through a portal,
//!   fetching at most `row_cap` rows from the server
//! - Parameters bind as `$n`, each converted to the type the server inferred for it
//! - JSON/JSONB preserved as nested JSON
//! - BYTEA data is Base64-encoded for JSON safety
//! - Timestamps become ISO 8601 strings

use serde_json::Value;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};

use crate::engine::{
    timeout_error, ConnectionConfig, DatabaseType, ExecutionAdapter, ExecutionOptions, RawRows,
};
use crate::error::{GatewayError, Result};

type BoundParam = Box<dyn ToSql + Sync + Send>;

/// `PostgreSQL` adapter holding resolved connection settings
#[derive(Debug, Clone)]
pub struct PostgresAdapter {
    config: Config,
}

impl PostgresAdapter {
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        if config.engine != DatabaseType::Postgres {
            return Err(GatewayError::config_error(format!(
                "Expected PostgreSQL engine, got {}",
                config.engine
            )));
        }

        Ok(Self { config: build_pg_config(config)? })
    }

    /// Per-call session settings
    fn session_config(&self, options: &ExecutionOptions) -> Config {
        let mut config = self.config.clone();
        config.options(&format!(
            "-c default_transaction_read_only=on -c statement_timeout={}",
            options.timeout_ms
        ));
        config
    }
}

impl ExecutionAdapter for PostgresAdapter {
    fn engine(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn execute(
        &self,
        sql: &str,
        params: &[Value],
        options: &ExecutionOptions,
    ) -> Result<RawRows> {
        let config = self.session_config(options);

        tokio::time::timeout(options.timeout(), async move {
            let (mut client, connection) = config.connect(NoTls).await.map_err(|e| {
                GatewayError::connection_failed(format!("Failed to connect to PostgreSQL: {e}"))
            })?;

            // Connection errors are not logged to prevent credential leakage
            tokio::spawn(async move {
                let _ = connection.await;
            });

            execute_query(&mut client, sql, params, options).await
        })
        .await
        .map_err(|_| timeout_error(options.timeout_ms))?
    }
}

/// Build `PostgreSQL` connection config from `ConnectionConfig`
fn build_pg_config(config: &ConnectionConfig) -> Result<Config> {
    let host = config
        .host
        .as_ref()
        .ok_or_else(|| GatewayError::config_error("PostgreSQL requires 'host' parameter"))?;

    let port = config
        .port
        .ok_or_else(|| GatewayError::config_error("PostgreSQL requires 'port' parameter"))?;

    let user = config
        .user
        .as_ref()
        .ok_or_else(|| GatewayError::config_error("PostgreSQL requires 'user' parameter"))?;

    let password = config
        .password
        .as_ref()
        .ok_or_else(|| GatewayError::config_error("PostgreSQL requires 'password' parameter"))?;

    // "*" connects to the default "postgres" database
    let db_name = match config.database.as_deref() {
        Some("*") => "postgres",
        Some(db) => db,
        None => {
            return Err(GatewayError::config_error(
                "PostgreSQL requires 'database' parameter (use \"*\" for default database)",
            ))
        }
    };

    let mut pg_config = Config::new();
    pg_config
        .host(host)
        .port(port)
        .user(user)
        .password(password)
        .dbname(db_name)
        .application_name("portcullis");

    Ok(pg_config)
}

async fn execute_query(
    client: &mut Client,
    sql: &str,
    params: &[Value],
    options: &ExecutionOptions,
) -> Result<RawRows> {
    let transaction = client
        .transaction()
        .await
        .map_err(|e| GatewayError::execution_failed(format!("Failed to start transaction: {e}")))?;

    let stmt = transaction
        .prepare(sql)
        .await
        .map_err(|e| GatewayError::execution_failed(format!("Failed to prepare query: {e}")))?;

    let expected = stmt.params();
    if expected.len() != params.len() {
        return Err(GatewayError::execution_failed(format!(
            "Query expects {} parameters, got {}",
            expected.len(),
            params.len()
        )));
    }

    let bound = params
        .iter()
        .zip(expected)
        .enumerate()
        .map(|(idx, (value, ty))| bind_param(value, ty, idx + 1))
        .collect::<Result<Vec<_>>>()?;
    let refs: Vec<&(dyn ToSql + Sync)> =
        bound.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();

    let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();

    if options.row_cap == Some(0) {
        return Ok(RawRows { columns, rows: Vec::new() });
    }

    let portal = transaction
        .bind(&stmt, &refs)
        .await
        .map_err(|e| GatewayError::execution_failed(format!("Failed to execute query: {e}")))?;

    // 0 asks the server for every row
    let max_rows = options.row_cap.map_or(0, |cap| i32::try_from(cap).unwrap_or(i32::MAX));
    let fetched = transaction
        .query_portal(&portal, max_rows)
        .await
        .map_err(|e| GatewayError::execution_failed(format!("Failed to fetch rows: {e}")))?;

    let rows = fetched.iter().map(row_to_json).collect::<Result<Vec<_>>>()?;

    transaction
        .rollback()
        .await
        .map_err(|e| GatewayError::engine_error("postgres", format!("Failed to end transaction: {e}")))?;

    Ok(RawRows { columns, rows })
}

/// `Some(None)` for JSON null, `Some(Some(v))` when `extract` accepts the value
fn scalar<T>(value: &Value, extract: impl Fn(&Value) -> Option<T>) -> Option<Option<T>> {
    if value.is_null() {
        Some(None)
    } else {
        extract(value).map(Some)
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Convert a JSON scalar to the parameter type the server inferred
fn bind_param(value: &Value, ty: &Type, position: usize) -> Result<BoundParam> {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

    let mismatch = || {
        GatewayError::execution_failed(format!(
            "Parameter ${position} cannot be bound as {}",
            ty.name()
        ))
    };

    let bound: BoundParam = match *ty {
        Type::BOOL => Box::new(scalar(value, Value::as_bool).ok_or_else(mismatch)?),
        Type::INT2 => Box::new(
            scalar(value, |v| v.as_i64().and_then(|i| i16::try_from(i).ok()))
                .ok_or_else(mismatch)?,
        ),
        Type::INT4 => Box::new(
            scalar(value, |v| v.as_i64().and_then(|i| i32::try_from(i).ok()))
                .ok_or_else(mismatch)?,
        ),
        Type::INT8 => Box::new(scalar(value, Value::as_i64).ok_or_else(mismatch)?),
        #[allow(clippy::cast_possible_truncation)]
        Type::FLOAT4 => {
            Box::new(scalar(value, |v| v.as_f64().map(|f| f as f32)).ok_or_else(mismatch)?)
        }
        Type::FLOAT8 => Box::new(scalar(value, Value::as_f64).ok_or_else(mismatch)?),
        Type::JSON | Type::JSONB => Box::new(value.clone()),
        Type::UUID => Box::new(
            scalar(value, |v| v.as_str().and_then(|s| uuid::Uuid::parse_str(s).ok()))
                .ok_or_else(mismatch)?,
        ),
        Type::DATE => Box::new(
            scalar(value, |v| {
                v.as_str().and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            })
            .ok_or_else(mismatch)?,
        ),
        Type::TIMESTAMP => Box::new(
            scalar(value, |v| {
                v.as_str().and_then(|s| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                        .ok()
                })
            })
            .ok_or_else(mismatch)?,
        ),
        Type::TIMESTAMPTZ => Box::new(
            scalar(value, |v| {
                v.as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.with_timezone(&Utc))
            })
            .ok_or_else(mismatch)?,
        ),
        _ => Box::new(scalar(value, as_text).ok_or_else(mismatch)?),
    };

    Ok(bound)
}

/// Convert a `PostgreSQL` row to a JSON-safe `Vec`
fn row_to_json(row: &Row) -> Result<Vec<Value>> {
    (0..row.len()).map(|idx| postgres_value_to_json(row, idx)).collect()
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        GatewayError::execution_failed(format!(
            "Failed to convert PostgreSQL type '{}' to JSON: {e}",
            row.columns()[idx].type_().name()
        ))
    })
}

/// Convert `PostgreSQL` value to JSON value
fn postgres_value_to_json(row: &Row, idx: usize) -> Result<Value> {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    let number = |f: f64| serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number);

    let value = match *row.columns()[idx].type_() {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx)?.map(Value::from),
        Type::INT4 => get::<i32>(row, idx)?.map(Value::from),
        Type::INT8 => get::<i64>(row, idx)?.map(Value::from),
        Type::OID => get::<u32>(row, idx)?.map(Value::from),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| number(f64::from(v))),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(number),
        Type::JSON | Type::JSONB => get::<Value>(row, idx)?,
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(|v| {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(v))
        }),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S").to_string())),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx)?.map(|v| Value::String(v.to_rfc3339())),
        Type::DATE => {
            get::<NaiveDate>(row, idx)?.map(|v| Value::String(v.format("%Y-%m-%d").to_string()))
        }
        Type::TIME => {
            get::<NaiveTime>(row, idx)?.map(|v| Value::String(v.format("%H:%M:%S").to_string()))
        }
        Type::UUID => get::<uuid::Uuid>(row, idx)?.map(|v| Value::String(v.to_string())),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => get::<Vec<Option<String>>>(row, idx)?
            .map(|items| Value::Array(items.into_iter().map(Value::from).collect())),
        Type::INT4_ARRAY => get::<Vec<Option<i32>>>(row, idx)?
            .map(|items| Value::Array(items.into_iter().map(Value::from).collect())),
        Type::INT8_ARRAY => get::<Vec<Option<i64>>>(row, idx)?
            .map(|items| Value::Array(items.into_iter().map(Value::from).collect())),
        _ => get::<String>(row, idx)?.map(Value::String),
    };

    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn local_config() -> ConnectionConfig {
        ConnectionConfig::postgres(
            "localhost".to_string(),
            5432,
            "postgres".to_string(),
            "postgres".to_string(),
            "postgres".to_string(),
        )
    }

    #[test]
    fn test_wildcard_database_config() {
        let mut config = local_config();
        config.database = Some("*".to_string());

        let pg_config = build_pg_config(&config).unwrap();
        assert_eq!(pg_config.get_dbname(), Some("postgres"));
    }

    #[test]
    fn test_missing_fields_are_config_errors() {
        let mut config = local_config();
        config.host = None;
        let err = PostgresAdapter::from_config(&config).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(err.message().contains("PostgreSQL requires 'host' parameter"));

        let mut config = local_config();
        config.database = None;
        assert!(PostgresAdapter::from_config(&config).is_err());
    }

    #[test]
    fn test_session_is_readonly_with_deadline() {
        let adapter = PostgresAdapter::from_config(&local_config()).unwrap();
        let config = adapter.session_config(&ExecutionOptions::new(2500));
        let options = config.get_options().unwrap_or_default();
        assert!(options.contains("default_transaction_read_only=on"));
        assert!(options.contains("statement_timeout=2500"));
    }

    #[test]
    fn test_bind_param_type_checks() {
        assert!(bind_param(&json!(5), &Type::INT4, 1).is_ok());
        assert!(bind_param(&json!(null), &Type::INT4, 1).is_ok());
        assert!(bind_param(&json!("2024-01-31"), &Type::DATE, 1).is_ok());
        assert!(bind_param(&json!("8a3c3e1e-2f5b-4a8e-9a43-2d1f2c3b4a5d"), &Type::UUID, 1).is_ok());
        assert!(bind_param(&json!(42), &Type::TEXT, 1).is_ok());

        let err = bind_param(&json!("abc"), &Type::INT4, 2).unwrap_err();
        assert!(err.message().contains("Parameter $2 cannot be bound as int4"));
        assert!(bind_param(&json!(70000), &Type::INT2, 1).is_err());
    }

    // The tests below need a running PostgreSQL instance:
    // cargo test --features postgres -- --ignored

    #[tokio::test]
    #[ignore]
    async fn test_execute_select_with_params() {
        let adapter = PostgresAdapter::from_config(&local_config()).unwrap();
        let raw = adapter
            .execute(
                "SELECT $1::int + 1 AS n, $2::text AS s",
                &[json!(41), json!("hi")],
                &ExecutionOptions::new(5000),
            )
            .await
            .unwrap();
        assert_eq!(raw.columns, vec!["n", "s"]);
        assert_eq!(raw.rows, vec![vec![json!(42), json!("hi")]]);
    }

    #[tokio::test]
    #[ignore]
    async fn test_row_cap_through_portal() {
        let adapter = PostgresAdapter::from_config(&local_config()).unwrap();
        let raw = adapter
            .execute(
                "SELECT * FROM generate_series(1, 1000)",
                &[],
                &ExecutionOptions::new(5000).with_row_cap(11),
            )
            .await
            .unwrap();
        assert_eq!(raw.rows.len(), 11);
    }

    #[tokio::test]
    #[ignore]
    async fn test_session_rejects_writes() {
        let adapter = PostgresAdapter::from_config(&local_config()).unwrap();
        let err = adapter
            .execute("CREATE TABLE portcullis_probe (id int)", &[], &ExecutionOptions::new(5000))
            .await
            .unwrap_err();
        assert!(err.message().contains("read-only"));
    }

    #[tokio::test]
    #[ignore]
    async fn test_timeout() {
        let adapter = PostgresAdapter::from_config(&local_config()).unwrap();
        let err = adapter
            .execute("SELECT pg_sleep(5)", &[], &ExecutionOptions::new(200))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "EXECUTION_FAILED");
    }
}
