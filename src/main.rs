//! Portcullis CLI Entry Point
//!
//! Subcommands:
//! - `query` - run a statement through the full admission pipeline
//! - `check` - validate and classify a statement without executing it
//! - `preview` - first rows of a table
//! - `mcp` - stdio JSON-RPC tool server (hidden, for agent integration)
//!
//! All output to stdout is JSON-only. Logs and audit events go to stderr.

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use portcullis::{
    AccessTier, ConnectionAdapter, ConnectionConfig, ErrorEnvelope, ExecutionAdapter, Gateway,
    GatewayConfig, GatewayError, Metadata, SuccessEnvelope,
};

/// Portcullis - readonly SQL query gateway
#[derive(Parser)]
#[command(name = "portcullis")]
#[command(about = "Readonly SQL query gateway with input validation, statement admission, and rate limiting")]
#[command(version)]
struct Cli {
    /// Configuration file (replaces local and global configuration)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter for stderr, e.g. `info` or `portcullis::audit=info` (default: RUST_LOG, then warn)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Target {
    /// `SQLite` database file (overrides the configured connection)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Caller identity used as the rate-limit key
    #[arg(long, default_value = "cli")]
    caller: String,

    /// Use the trusted tier's row ceiling
    #[arg(long)]
    trusted: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a readonly SQL statement
    Query {
        #[arg(long)]
        sql: String,

        /// Maximum rows to return
        #[arg(long)]
        limit: Option<u64>,

        /// Execution timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Positional parameter as JSON (`42`, `true`, `null`, `"text"`); bare words are strings
        #[arg(long = "param")]
        params: Vec<String>,

        #[command(flatten)]
        target: Target,
    },

    /// Validate and classify a statement without executing it
    Check {
        #[arg(long)]
        sql: String,
    },

    /// Show the first rows of a table
    Preview {
        #[arg(long)]
        table: String,

        /// Maximum rows to return
        #[arg(long)]
        limit: Option<u64>,

        #[command(flatten)]
        target: Target,
    },

    /// Start the stdio tool server (hidden from help, for agent integration)
    #[command(hide = true)]
    Mcp {
        /// `SQLite` database file (overrides the configured connection)
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let config = match GatewayConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => return emit_error("", command_name(&cli.command), &err),
    };

    let gateway = match Gateway::new(config) {
        Ok(gateway) => gateway,
        Err(err) => return emit_error("", command_name(&cli.command), &err),
    };

    match cli.command {
        Commands::Query { sql, limit, timeout_ms, params, target } => {
            let payload = query_payload(sql, limit, timeout_ms, &params);
            run_query(&gateway, &target, Request::Query(payload)).await
        }
        Commands::Preview { table, limit, target } => {
            run_query(&gateway, &target, Request::Preview { table, limit }).await
        }
        Commands::Check { sql } => {
            let payload = serde_json::json!({ "sql": sql });
            match gateway.validate_and_classify(&payload, "cli") {
                Ok((_, statement)) => {
                    emit(&SuccessEnvelope::new("", "check", statement, Metadata::new(0)), true)
                }
                Err(err) => emit_error("", "check", &err),
            }
        }
        Commands::Mcp { file } => {
            let adapter = match optional_adapter(gateway.config(), file.as_deref()) {
                Ok(adapter) => adapter,
                Err(err) => return emit_error("", "mcp", &err),
            };
            match portcullis::mcp::McpServer::new(gateway, adapter).serve().await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!("stdio server stopped: {e:#}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

/// Logs go to stderr so stdout stays JSON-only
fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

const fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Query { .. } => "query",
        Commands::Check { .. } => "check",
        Commands::Preview { .. } => "preview",
        Commands::Mcp { .. } => "mcp",
    }
}

fn query_payload(
    sql: String,
    limit: Option<u64>,
    timeout_ms: Option<u64>,
    params: &[String],
) -> Value {
    let mut payload = Map::new();
    payload.insert("sql".to_string(), Value::String(sql));
    if let Some(limit) = limit {
        payload.insert("limit".to_string(), Value::from(limit));
    }
    if let Some(timeout_ms) = timeout_ms {
        payload.insert("timeout_ms".to_string(), Value::from(timeout_ms));
    }
    if !params.is_empty() {
        let values = params
            .iter()
            .map(|p| serde_json::from_str(p).unwrap_or_else(|_| Value::String(p.clone())))
            .collect();
        payload.insert("params".to_string(), Value::Array(values));
    }
    Value::Object(payload)
}

/// Adapter for `--file`, else the configured connection
fn resolve_adapter(config: &GatewayConfig, file: Option<&Path>) -> portcullis::Result<ConnectionAdapter> {
    optional_adapter(config, file)?.ok_or_else(|| {
        GatewayError::config_error(
            "No database connection configured; pass --file or add a connection to the config file",
        )
    })
}

fn optional_adapter(
    config: &GatewayConfig,
    file: Option<&Path>,
) -> portcullis::Result<Option<ConnectionAdapter>> {
    let connection = match (file, &config.connection) {
        (Some(file), _) => ConnectionConfig::sqlite(file.to_path_buf()),
        (None, Some(stored)) => stored.resolve()?,
        (None, None) => return Ok(None),
    };
    ConnectionAdapter::from_config(&connection).map(Some)
}

enum Request {
    Query(Value),
    Preview { table: String, limit: Option<u64> },
}

async fn run_query(gateway: &Gateway, target: &Target, request: Request) -> ExitCode {
    let command = match request {
        Request::Query(_) => "query",
        Request::Preview { .. } => "preview",
    };
    let adapter = match resolve_adapter(gateway.config(), target.file.as_deref()) {
        Ok(adapter) => adapter,
        Err(err) => return emit_error("", command, &err),
    };
    let engine = adapter.engine().as_str();
    let tier = if target.trusted { AccessTier::Trusted } else { gateway.config().default_tier };

    let outcome = match &request {
        Request::Query(payload) => gateway.handle(&adapter, payload, &target.caller, tier).await,
        Request::Preview { table, limit } => {
            gateway.preview_table(&adapter, table, *limit, &target.caller, tier).await
        }
    };

    match outcome {
        Ok(outcome) => emit(&SuccessEnvelope::from_outcome(engine, command, outcome), true),
        Err(err) => emit_error(engine, command, &err),
    }
}

fn emit_error(engine: &str, command: &str, err: &GatewayError) -> ExitCode {
    emit(&ErrorEnvelope::from_error(engine, command, err), false)
}

fn emit(envelope: &impl Serialize, ok: bool) -> ExitCode {
    match serde_json::to_string_pretty(envelope) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            tracing::error!("failed to serialize output: {e}");
            return ExitCode::FAILURE;
        }
    }

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
