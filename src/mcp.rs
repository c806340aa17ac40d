//! Stdio Tool Server
//!
//! Line-delimited JSON-RPC 2.0 over stdin/stdout exposing the gateway to agent clients.
//!
//! # Architecture
//!
//! - **Transport**: one JSON request per line in, one JSON response per line out
//! - **Dependencies**: `serde_json`, `anyhow`, and `schemars` for tool input schemas
//! - **Protocol**: `initialize`, `tools/list`, `tools/call`; notifications get no response
//!
//! # Tools
//!
//! - `query` - run a readonly statement through the full admission pipeline
//! - `check` - validate and classify a statement without executing it
//! - `preview` - `SELECT * FROM <table>` for a validated table name
//!
//! Tool results wrap the same JSON envelopes the CLI prints; a rejected request is an error
//! envelope inside a successful JSON-RPC response, never a transport error.
//!
//! # Caller Identity
//!
//! The client name sent in `initialize` (`clientInfo.name`) becomes the rate-limit key for the
//! session, `stdio` when absent.

use anyhow::{anyhow, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, BufRead, Write};

use crate::bounding::AccessTier;
use crate::engine::{ConnectionAdapter, ExecutionAdapter};
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::output::{ErrorEnvelope, Metadata, SuccessEnvelope};

const DEFAULT_CALLER: &str = "stdio";

// ============================================================================
// JSON-RPC 2.0 Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn result(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: Some(result), error: None }
    }

    fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

// ============================================================================
// Tool Result Structures
// ============================================================================

#[derive(Debug, Serialize)]
struct TextContent {
    #[serde(rename = "type")]
    content_type: String,
    text: String,
}

#[derive(Debug, Serialize)]
struct CallToolResult {
    content: Vec<TextContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

impl CallToolResult {
    fn envelope(envelope: &impl Serialize, is_error: bool) -> Result<Value> {
        let text = serde_json::to_string_pretty(envelope)?;
        let result =
            Self { content: vec![TextContent { content_type: "text".to_string(), text }], is_error };
        Ok(serde_json::to_value(result)?)
    }
}

// ============================================================================
// Tool Arguments
// ============================================================================

/// Run a readonly SQL statement. Values must be passed as positional `params`, never inlined.
#[allow(dead_code)]
#[derive(Debug, JsonSchema)]
struct QueryArgs {
    /// Statement to execute; must start with SELECT, SHOW, DESCRIBE, DESC, EXPLAIN or ANALYZE
    sql: String,
    /// Maximum rows to return (1-1000, default 100; further capped by access tier)
    limit: Option<u64>,
    /// Execution timeout in milliseconds (1000-30000, default 30000)
    timeout_ms: Option<u64>,
    /// Positional parameters bound to `?` / `$n` placeholders (scalars only)
    params: Option<Vec<Value>>,
}

/// Validate and classify a statement without executing it.
#[allow(dead_code)]
#[derive(Debug, JsonSchema)]
struct CheckArgs {
    /// Statement to check
    sql: String,
}

/// Return the first rows of a table.
#[allow(dead_code)]
#[derive(Debug, JsonSchema)]
struct PreviewArgs {
    /// Table name (letters, digits and underscores, starting with a letter)
    table: String,
    /// Maximum rows to return (1-1000, default 100)
    limit: Option<u64>,
}

fn tool_definition<T: JsonSchema>(name: &str, description: &str) -> Result<Value> {
    let schema = serde_json::to_value(schemars::schema_for!(T))?;
    Ok(serde_json::json!({
        "name": name,
        "description": description,
        "inputSchema": schema,
    }))
}

// ============================================================================
// Server
// ============================================================================

/// Stdio server state: the gateway, the configured adapter, and the session's caller identity
pub struct McpServer {
    gateway: Gateway,
    adapter: Option<ConnectionAdapter>,
    tier: AccessTier,
    caller: String,
    /// Set by the first `initialize`; the caller is fixed from then on
    initialized: bool,
}

impl McpServer {
    #[must_use]
    pub fn new(gateway: Gateway, adapter: Option<ConnectionAdapter>) -> Self {
        let tier = gateway.config().default_tier;
        Self { gateway, adapter, tier, caller: DEFAULT_CALLER.to_string(), initialized: false }
    }

    /// Caller identity used for rate limiting
    #[must_use]
    pub fn caller(&self) -> &str {
        &self.caller
    }

    fn engine(&self) -> &'static str {
        self.adapter.as_ref().map_or("", |a| a.engine().as_str())
    }

    /// Serve stdin/stdout until stdin closes
    #[allow(clippy::future_not_send)]
    pub async fn serve(&mut self) -> Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        self.run(stdin.lock(), &mut stdout).await
    }

    /// Serve requests from `reader`, writing responses to `writer`
    #[allow(clippy::future_not_send)]
    pub async fn run<R: BufRead, W: Write>(&mut self, reader: R, writer: &mut W) -> Result<()> {
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => Some(JsonRpcResponse::error(None, -32700, format!("Parse error: {e}"))),
            };

            if let Some(response) = response {
                writeln!(writer, "{}", serde_json::to_string(&response)?)?;
                writer.flush()?;
            }
        }

        Ok(())
    }

    async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.id.is_none() && request.method.starts_with("notifications/") {
            return None;
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params.as_ref()),
            "tools/list" => handle_list_tools(),
            "tools/call" => self.handle_call_tool(request.params.as_ref()).await,
            "ping" => Ok(serde_json::json!({})),
            _ => {
                return Some(JsonRpcResponse::error(
                    request.id,
                    -32601,
                    format!("Unknown method: {}", request.method),
                ))
            }
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::result(request.id, value),
            Err(e) => JsonRpcResponse::error(request.id, -32603, e.to_string()),
        })
    }

    fn handle_initialize(&mut self, params: Option<&Value>) -> Result<Value> {
        if self.initialized {
            tracing::warn!(caller = %self.caller, "repeated initialize ignored, caller unchanged");
        } else {
            if let Some(name) = params
                .and_then(|p| p.pointer("/clientInfo/name"))
                .and_then(Value::as_str)
                .filter(|name| !name.trim().is_empty())
            {
                self.caller = name.to_string();
            }
            self.initialized = true;
            tracing::debug!(caller = %self.caller, "stdio session initialized");
        }

        Ok(serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": "portcullis",
                "version": env!("CARGO_PKG_VERSION")
            }
        }))
    }

    async fn handle_call_tool(&self, params: Option<&Value>) -> Result<Value> {
        let params = params.ok_or_else(|| anyhow!("Missing params"))?;
        let name = params["name"].as_str().ok_or_else(|| anyhow!("Missing tool name"))?;
        let null = Value::Null;
        let arguments = params.get("arguments").unwrap_or(&null);

        match name {
            "query" => self.tool_query(arguments).await,
            "check" => self.tool_check(arguments),
            "preview" => self.tool_preview(arguments).await,
            _ => Err(anyhow!("Unknown tool: {name}")),
        }
    }

    fn adapter(&self) -> std::result::Result<&ConnectionAdapter, GatewayError> {
        self.adapter
            .as_ref()
            .ok_or_else(|| GatewayError::config_error("No database connection configured"))
    }

    async fn tool_query(&self, args: &Value) -> Result<Value> {
        let outcome = match self.adapter() {
            Ok(adapter) => self.gateway.handle(adapter, args, &self.caller, self.tier).await,
            Err(e) => Err(e),
        };
        self.respond("query", outcome.map(|o| SuccessEnvelope::from_outcome(self.engine(), "query", o)))
    }

    fn tool_check(&self, args: &Value) -> Result<Value> {
        let checked = self.gateway.validate_and_classify(args, &self.caller).map(|(_, statement)| {
            SuccessEnvelope::new(self.engine(), "check", statement, Metadata::new(0))
        });
        self.respond("check", checked)
    }

    async fn tool_preview(&self, args: &Value) -> Result<Value> {
        let table = args.get("table").and_then(Value::as_str).unwrap_or_default();
        let limit = args.get("limit").and_then(Value::as_u64);

        let outcome = match self.adapter() {
            Ok(adapter) => {
                self.gateway.preview_table(adapter, table, limit, &self.caller, self.tier).await
            }
            Err(e) => Err(e),
        };
        self.respond(
            "preview",
            outcome.map(|o| SuccessEnvelope::from_outcome(self.engine(), "preview", o)),
        )
    }

    fn respond<T: Serialize>(
        &self,
        command: &str,
        result: std::result::Result<SuccessEnvelope<T>, GatewayError>,
    ) -> Result<Value> {
        match result {
            Ok(envelope) => CallToolResult::envelope(&envelope, false),
            Err(err) => {
                CallToolResult::envelope(&ErrorEnvelope::from_error(self.engine(), command, &err), true)
            }
        }
    }
}

fn handle_list_tools() -> Result<Value> {
    Ok(serde_json::json!({
        "tools": [
            tool_definition::<QueryArgs>(
                "query",
                "Run a READONLY SQL statement through input validation, rate limiting and statement \
                 classification. Write and DDL statements, multiple statements, comments, quotes and \
                 dangerous functions are rejected; pass values as positional params. Results are \
                 capped and flagged as truncated when rows were dropped.",
            )?,
            tool_definition::<CheckArgs>(
                "check",
                "Validate and classify a statement without executing it. Returns the canonical \
                 text that would run, or every reason the statement would be rejected.",
            )?,
            tool_definition::<PreviewArgs>(
                "preview",
                "Return the first rows of a table (SELECT * FROM <table>).",
            )?,
        ]
    }))
}
