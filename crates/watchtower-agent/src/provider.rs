use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tool definition advertised to the chat model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from a model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw argument string as the model produced it — parsed (and validated)
    /// at execution time so malformed JSON becomes a structured tool error.
    pub arguments: String,
}

/// Request to the chat model. Messages are kept in OpenAI wire format
/// (`{"role": ..., "content": ...}` plus `tool_calls` / `tool_call_id`
/// fields) end-to-end, so the dispatch loop appends to them directly.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<serde_json::Value>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Parsed (non-streaming) model response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub finish_reason: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Interface to a chat-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Send a request and wait for the full response.
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse>;
}
