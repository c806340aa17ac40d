//! MySQL Execution Adapter (including MariaDB)
//!
//! # Implementation Notes
//! - Uses `mysql_async` (async driver, requires tokio runtime)
//! - Every session runs `SET SESSION TRANSACTION READ ONLY` on connect
//! - Statements go through the binary protocol so parameters bind as `?`
//! - Rows stream off the wire; anything past `row_cap` is drained without being decoded
//! - ENUM and SET values arrive as strings; BLOB data is Base64-encoded for JSON safety

use mysql_async::{prelude::*, Conn, OptsBuilder, Params, Row, Value as SqlValue};
use serde_json::Value;

use crate::engine::{
    timeout_error, ConnectionConfig, DatabaseType, ExecutionAdapter, ExecutionOptions, RawRows,
};
use crate::error::{GatewayError, Result};

const READONLY_SESSION: &str = "SET SESSION TRANSACTION READ ONLY";

/// MySQL adapter holding resolved connection settings
#[derive(Debug, Clone)]
pub struct MySqlAdapter {
    opts: OptsBuilder,
}

impl MySqlAdapter {
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        if config.engine != DatabaseType::MySQL {
            return Err(GatewayError::config_error(format!(
                "Expected MySQL engine, got {}",
                config.engine
            )));
        }

        Ok(Self { opts: build_mysql_opts(config)? })
    }
}

impl ExecutionAdapter for MySqlAdapter {
    fn engine(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    async fn execute(
        &self,
        sql: &str,
        params: &[Value],
        options: &ExecutionOptions,
    ) -> Result<RawRows> {
        let opts = self.opts.clone();

        tokio::time::timeout(options.timeout(), async move {
            let mut conn = Conn::new(opts).await.map_err(|e| {
                GatewayError::connection_failed(format!("Failed to connect to MySQL: {e}"))
            })?;

            let raw = execute_query(&mut conn, sql, params, options).await?;

            conn.disconnect().await.map_err(|e| {
                GatewayError::engine_error("mysql", format!("Failed to disconnect: {e}"))
            })?;

            Ok(raw)
        })
        .await
        .map_err(|_| timeout_error(options.timeout_ms))?
    }
}

/// Build MySQL connection options from `ConnectionConfig`
fn build_mysql_opts(config: &ConnectionConfig) -> Result<OptsBuilder> {
    let host = config
        .host
        .as_ref()
        .ok_or_else(|| GatewayError::config_error("MySQL requires 'host' parameter"))?;

    let port = config
        .port
        .ok_or_else(|| GatewayError::config_error("MySQL requires 'port' parameter"))?;

    let user = config
        .user
        .as_ref()
        .ok_or_else(|| GatewayError::config_error("MySQL requires 'user' parameter"))?;

    let password = config
        .password
        .as_ref()
        .ok_or_else(|| GatewayError::config_error("MySQL requires 'password' parameter"))?;

    let database = config
        .database
        .as_ref()
        .ok_or_else(|| GatewayError::config_error("MySQL requires 'database' parameter"))?;

    let opts = OptsBuilder::default()
        .ip_or_hostname(host)
        .tcp_port(port)
        .user(Some(user))
        .pass(Some(password))
        .db_name(Some(database))
        .init(vec![READONLY_SESSION]);

    Ok(opts)
}

async fn execute_query(
    conn: &mut Conn,
    sql: &str,
    params: &[Value],
    options: &ExecutionOptions,
) -> Result<RawRows> {
    let params = if params.is_empty() {
        Params::Empty
    } else {
        Params::Positional(params.iter().map(json_to_sql).collect())
    };

    let mut result = conn
        .exec_iter(sql, params)
        .await
        .map_err(|e| GatewayError::execution_failed(format!("Failed to execute query: {e}")))?;

    let columns: Vec<String> =
        result.columns_ref().iter().map(|col| col.name_str().to_string()).collect();

    let mut rows = Vec::new();
    while options.wants_more(rows.len()) {
        let next = result
            .next()
            .await
            .map_err(|e| GatewayError::execution_failed(format!("Failed to fetch row: {e}")))?;
        let Some(row) = next else { break };
        rows.push(row_to_json(&row)?);
    }

    result
        .drop_result()
        .await
        .map_err(|e| GatewayError::engine_error("mysql", format!("Failed to drain result: {e}")))?;

    Ok(RawRows { columns, rows })
}

/// Convert a bound JSON scalar to a MySQL value
fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::NULL,
        Value::Bool(b) => SqlValue::Int(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                SqlValue::UInt(u)
            } else {
                n.as_f64().map_or(SqlValue::NULL, SqlValue::Double)
            }
        }
        Value::String(s) => SqlValue::Bytes(s.as_bytes().to_vec()),
        other => SqlValue::Bytes(other.to_string().into_bytes()),
    }
}

/// Convert a MySQL row to a JSON-safe `Vec`
fn row_to_json(row: &Row) -> Result<Vec<Value>> {
    (0..row.len()).map(|idx| mysql_value_to_json(row, idx)).collect()
}

/// Convert MySQL value to JSON value
fn mysql_value_to_json(row: &Row, idx: usize) -> Result<Value> {
    let value = row.as_ref(idx).ok_or_else(|| {
        GatewayError::execution_failed(format!("Failed to get value at index {idx}"))
    })?;

    let json_value = match value {
        SqlValue::NULL => Value::Null,

        SqlValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => {
                use base64::Engine;
                Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        },

        SqlValue::Int(i) => Value::from(*i),
        SqlValue::UInt(u) => Value::from(*u),

        // NaN/Infinity have no JSON form
        SqlValue::Float(f) => {
            serde_json::Number::from_f64(f64::from(*f)).map_or(Value::Null, Value::Number)
        }
        SqlValue::Double(d) => serde_json::Number::from_f64(*d).map_or(Value::Null, Value::Number),

        SqlValue::Date(year, month, day, hour, minute, second, micro) => Value::String(format!(
            "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micro:06}"
        )),

        SqlValue::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if *is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(*hours);
            Value::String(format!("{sign}{total_hours}:{minutes:02}:{seconds:02}.{micros:06}"))
        }
    };

    Ok(json_value)
}
