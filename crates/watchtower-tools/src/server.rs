//! Line-delimited JSON tool protocol over stdio.
//!
//! One JSON object per line. Requests:
//!   `{"id": 1, "method": "list_tools"}`
//!   `{"id": 2, "method": "call_tool", "name": "...", "arguments": {...}}`
//! Responses: `{"id": ..., "result": ...}` or `{"id": ..., "error": {"code", "message"}}`.
//!
//! Tool-level failures are successful responses whose result carries
//! `status: "error"`; the `error` envelope is reserved for protocol problems.

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use crate::catalog::tool_definitions;
use crate::host::ToolHost;

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

/// Serve the protocol until stdin closes.
pub async fn run(host: ToolHost) -> std::io::Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    info!("tool server ready on stdio");

    while let Some(line) = lines.next_line().await? {
        let Some(response) = handle_line(&host, &line).await else {
            continue;
        };
        let mut body = response.to_string();
        body.push('\n');
        stdout.write_all(body.as_bytes()).await?;
        stdout.flush().await?;
    }

    info!("stdin closed, tool server exiting");
    Ok(())
}

/// Process one request line. Returns `None` for blank lines.
pub async fn handle_line(host: &ToolHost, line: &str) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let request: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return Some(error_response(
                Value::Null,
                PARSE_ERROR,
                &format!("parse error: {e}"),
            ));
        }
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");

    match method {
        "list_tools" => Some(json!({
            "id": id,
            "result": { "tools": tool_definitions() },
        })),
        "call_tool" => {
            let Some(name) = request.get("name").and_then(|n| n.as_str()) else {
                return Some(error_response(id, INVALID_PARAMS, "missing tool name"));
            };
            let arguments = request.get("arguments").cloned().unwrap_or(json!({}));
            let result = host.call(name, &arguments).await;
            Some(json!({ "id": id, "result": result }))
        }
        other => Some(error_response(
            id,
            METHOD_NOT_FOUND,
            &format!("method not found: {other}"),
        )),
    }
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "id": id,
        "error": { "code": code, "message": message },
    })
}
