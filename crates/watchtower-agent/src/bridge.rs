use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{AgentError, Result};
use crate::provider::ToolDefinition;

/// Something that can list and execute tools for the dispatch loop.
///
/// The production implementation is [`ToolBridge`]; tests substitute a
/// scripted executor.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// The catalog, cached for the life of the connection.
    async fn tools(&self) -> Result<Vec<ToolDefinition>>;

    /// Execute one tool. Tool-level failures come back as `Ok` values
    /// carrying `status: "error"`; `Err` means the transport itself broke.
    async fn call(&self, name: &str, arguments: &Value) -> Result<Value>;
}

/// Client side of the stdio tool protocol: spawns the tool server as a child
/// process and speaks line-delimited JSON over its pipes.
pub struct ToolBridge {
    // Requests are strictly sequential per connection, so one lock covers
    // both pipe halves and response correlation stays trivial.
    io: Mutex<BridgeIo>,
    next_id: AtomicU64,
    catalog: Mutex<Option<Vec<ToolDefinition>>>,
    _child: Child,
}

struct BridgeIo {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl ToolBridge {
    /// Spawn the tool-server process. The child inherits stderr so its
    /// diagnostics land in the parent's log stream.
    pub fn spawn(command: &str, args: &[String]) -> Result<Self> {
        info!(command, "spawning tool server");
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Bridge(format!("failed to spawn {command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Bridge("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Bridge("child stdout unavailable".to_string()))?;

        Ok(Self {
            io: Mutex::new(BridgeIo {
                stdin,
                stdout: BufReader::new(stdout).lines(),
            }),
            next_id: AtomicU64::new(1),
            catalog: Mutex::new(None),
            _child: child,
        })
    }

    async fn request(&self, mut payload: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        payload["id"] = json!(id);

        let mut io = self.io.lock().await;
        let mut line = payload.to_string();
        line.push('\n');
        io.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| AgentError::Bridge(format!("write failed: {e}")))?;
        io.stdin
            .flush()
            .await
            .map_err(|e| AgentError::Bridge(format!("flush failed: {e}")))?;

        let response = io
            .stdout
            .next_line()
            .await
            .map_err(|e| AgentError::Bridge(format!("read failed: {e}")))?
            .ok_or_else(|| AgentError::Bridge("tool server closed its pipe".to_string()))?;

        let parsed: Value = serde_json::from_str(&response)
            .map_err(|e| AgentError::Bridge(format!("bad response: {e}")))?;

        if parsed.get("id").and_then(Value::as_u64) != Some(id) {
            return Err(AgentError::Bridge("response id mismatch".to_string()));
        }
        if let Some(err) = parsed.get("error") {
            return Err(AgentError::Bridge(format!(
                "protocol error: {}",
                err.get("message").and_then(Value::as_str).unwrap_or("?")
            )));
        }
        parsed
            .get("result")
            .cloned()
            .ok_or_else(|| AgentError::Bridge("response missing result".to_string()))
    }
}

#[async_trait]
impl ToolExecutor for ToolBridge {
    async fn tools(&self) -> Result<Vec<ToolDefinition>> {
        {
            let cached = self.catalog.lock().await;
            if let Some(tools) = cached.as_ref() {
                return Ok(tools.clone());
            }
        }

        let result = self.request(json!({"method": "list_tools"})).await?;
        let raw = result
            .get("tools")
            .and_then(Value::as_array)
            .ok_or_else(|| AgentError::Bridge("list_tools returned no tools".to_string()))?;

        let tools: Vec<ToolDefinition> = raw
            .iter()
            .filter_map(|t| {
                Some(ToolDefinition {
                    name: t.get("name")?.as_str()?.to_string(),
                    description: t
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    input_schema: t
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                })
            })
            .collect();

        debug!(count = tools.len(), "tool catalog loaded");
        let mut cached = self.catalog.lock().await;
        *cached = Some(tools.clone());
        Ok(tools)
    }

    async fn call(&self, name: &str, arguments: &Value) -> Result<Value> {
        self.request(json!({
            "method": "call_tool",
            "name": name,
            "arguments": arguments,
        }))
        .await
    }
}
