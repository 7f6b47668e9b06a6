use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::postprocess::strip_thinking;
use crate::provider::{ChatRequest, LlmProvider};
use crate::bridge::ToolExecutor;

/// Iteration cap per user turn — keeps a confused model from ping-ponging
/// tool calls forever.
const MAX_ITERATIONS: usize = 4;

/// Appended to the reply when the loop runs out of iterations.
const TRUNCATION_NOTE: &str = "\n\n[Stopped after reaching the tool-call limit for this turn.]";

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Result of one dispatch-loop turn.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// Messages produced this turn, in exchange order: assistant-with-calls
    /// and tool results interleaved, ending with the final assistant message.
    /// The caller persists these verbatim.
    pub new_messages: Vec<Value>,
    /// Final assistant text with thinking regions removed.
    pub reply: String,
    /// Extracted thinking trace, for the debugging field.
    pub thinking: Option<String>,
    /// True when the iteration bound cut the loop short.
    pub truncated: bool,
}

/// Run one user turn: model call → tool executions → model call, bounded.
///
/// `history` is the full prior conversation in OpenAI wire format, already
/// ending with the new user message. Tool invocation failures are converted
/// to structured error payloads and fed back to the model — the loop only
/// errors on transport-level problems or cancellation. Cancellation aborts
/// at the next await point; the caller persists nothing for a cancelled turn.
pub async fn run_dispatch_loop(
    provider: &dyn LlmProvider,
    executor: &dyn ToolExecutor,
    history: &[Value],
    opts: &DispatchOptions,
    cancel: &CancellationToken,
) -> Result<DispatchOutcome> {
    let tools = executor.tools().await?;
    let mut messages: Vec<Value> = history.to_vec();
    let mut new_messages: Vec<Value> = Vec::new();

    for iteration in 0..MAX_ITERATIONS {
        let req = ChatRequest {
            model: opts.model.clone(),
            messages: messages.clone(),
            tools: tools.clone(),
            max_tokens: opts.max_tokens,
            temperature: opts.temperature,
        };

        debug!(iteration, "dispatch loop iteration");
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            r = provider.send(&req) => r?,
        };

        if !response.wants_tools() {
            let (reply, thinking) = strip_thinking(&response.content);
            let mut assistant = json!({"role": "assistant", "content": reply});
            if let Some(ref t) = thinking {
                assistant["thinking"] = json!(t);
            }
            new_messages.push(assistant);
            info!(iteration, "dispatch complete");
            return Ok(DispatchOutcome {
                new_messages,
                reply,
                thinking,
                truncated: false,
            });
        }

        // Record the assistant turn exactly as the model produced it.
        let assistant_msg = json!({
            "role": "assistant",
            "content": if response.content.is_empty() {
                Value::Null
            } else {
                json!(response.content)
            },
            "tool_calls": response.tool_calls.iter().map(|c| json!({
                "id": c.id,
                "type": "function",
                "function": {"name": c.name, "arguments": c.arguments},
            })).collect::<Vec<_>>(),
        });
        messages.push(assistant_msg.clone());
        new_messages.push(assistant_msg);

        for call in &response.tool_calls {
            let result = match serde_json::from_str::<Value>(&call.arguments) {
                Ok(arguments) => {
                    let invocation = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                        r = executor.call(&call.name, &arguments) => r,
                    };
                    match invocation {
                        Ok(v) => v,
                        // Bridge failures become data the model can react to;
                        // the turn itself keeps going.
                        Err(e) => json!({
                            "status": "error",
                            "message": e.to_string(),
                            "tool_name": call.name,
                        }),
                    }
                }
                Err(e) => json!({
                    "status": "error",
                    "message": format!("invalid tool arguments: {e}"),
                    "tool_name": call.name,
                }),
            };

            let tool_msg = json!({
                "role": "tool",
                "tool_call_id": call.id,
                "content": result.to_string(),
            });
            messages.push(tool_msg.clone());
            new_messages.push(tool_msg);
        }
    }

    warn!(max_iterations = MAX_ITERATIONS, "dispatch hit iteration bound");

    // Surface the last assistant text we have, annotated.
    let last_text = new_messages
        .iter()
        .rev()
        .filter(|m| m["role"] == "assistant")
        .find_map(|m| m["content"].as_str().map(String::from))
        .unwrap_or_default();
    let (visible, thinking) = strip_thinking(&last_text);
    let reply = format!("{visible}{TRUNCATION_NOTE}");
    new_messages.push(json!({"role": "assistant", "content": reply}));

    Ok(DispatchOutcome {
        new_messages,
        reply,
        thinking,
        truncated: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::provider::{ChatResponse, ToolCall, ToolDefinition};

    /// Scripted provider: pops responses front-to-back.
    struct ScriptedProvider {
        responses: Mutex<Vec<ChatResponse>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                // Keep returning a terminal answer if the script runs dry.
                return Ok(text_response("done"));
            }
            Ok(responses.remove(0))
        }
    }

    struct RecordingExecutor {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingExecutor {
        fn new(fail: bool) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl ToolExecutor for RecordingExecutor {
        async fn tools(&self) -> Result<Vec<ToolDefinition>> {
            Ok(vec![ToolDefinition {
                name: "get_recent_events".to_string(),
                description: "recent".to_string(),
                input_schema: json!({"type": "object"}),
            }])
        }

        async fn call(&self, name: &str, _arguments: &Value) -> Result<Value> {
            self.calls.lock().unwrap().push(name.to_string());
            if self.fail {
                Ok(json!({"status": "error", "message": "archive offline", "tool_name": name}))
            } else {
                Ok(json!({"status": "success", "count": 3}))
            }
        }
    }

    fn text_response(text: &str) -> ChatResponse {
        ChatResponse {
            content: text.to_string(),
            finish_reason: "stop".to_string(),
            tool_calls: vec![],
        }
    }

    fn tool_response(name: &str, arguments: &str) -> ChatResponse {
        ChatResponse {
            content: String::new(),
            finish_reason: "tool_calls".to_string(),
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
        }
    }

    fn opts() -> DispatchOptions {
        DispatchOptions {
            model: "test-model".to_string(),
            max_tokens: 256,
            temperature: 0.3,
        }
    }

    fn user_turn(text: &str) -> Vec<Value> {
        vec![json!({"role": "user", "content": text})]
    }

    #[tokio::test]
    async fn plain_reply_yields_single_assistant_message() {
        let provider = ScriptedProvider::new(vec![text_response("hello")]);
        let executor = RecordingExecutor::new(false);
        let out = run_dispatch_loop(
            &provider,
            &executor,
            &user_turn("hi"),
            &opts(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(out.new_messages.len(), 1);
        assert_eq!(out.new_messages[0]["role"], "assistant");
        assert_eq!(out.reply, "hello");
        assert!(!out.truncated);
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tool_call_turn_produces_ordered_sequence() {
        // Model asks for get_recent_events(hours=1), then answers.
        let provider = ScriptedProvider::new(vec![
            tool_response("get_recent_events", "{\"hours\": 1}"),
            text_response("3 events in the last hour"),
        ]);
        let executor = RecordingExecutor::new(false);
        let out = run_dispatch_loop(
            &provider,
            &executor,
            &user_turn("what happened?"),
            &opts(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let roles: Vec<&str> = out
            .new_messages
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["assistant", "tool", "assistant"]);
        assert_eq!(out.new_messages[1]["tool_call_id"], "call_1");
        assert_eq!(out.reply, "3 events in the last hour");
        assert_eq!(*executor.calls.lock().unwrap(), vec!["get_recent_events"]);
    }

    #[tokio::test]
    async fn tool_error_still_reaches_a_final_answer() {
        let provider = ScriptedProvider::new(vec![
            tool_response("get_recent_events", "{}"),
            text_response("the archive is unreachable right now"),
        ]);
        let executor = RecordingExecutor::new(true);
        let out = run_dispatch_loop(
            &provider,
            &executor,
            &user_turn("check events"),
            &opts(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let tool_msg = &out.new_messages[1];
        let payload: Value =
            serde_json::from_str(tool_msg["content"].as_str().unwrap()).unwrap();
        assert_eq!(payload["status"], "error");
        assert_eq!(out.reply, "the archive is unreachable right now");
    }

    #[tokio::test]
    async fn malformed_arguments_become_structured_error() {
        let provider = ScriptedProvider::new(vec![
            tool_response("get_recent_events", "{not json"),
            text_response("could not run the tool"),
        ]);
        let executor = RecordingExecutor::new(false);
        let out = run_dispatch_loop(
            &provider,
            &executor,
            &user_turn("check"),
            &opts(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        // The executor was never reached.
        assert!(executor.calls.lock().unwrap().is_empty());
        let payload: Value =
            serde_json::from_str(out.new_messages[1]["content"].as_str().unwrap()).unwrap();
        assert!(payload["message"]
            .as_str()
            .unwrap()
            .contains("invalid tool arguments"));
    }

    #[tokio::test]
    async fn iteration_bound_truncates_with_annotation() {
        // A model that never stops calling tools.
        let provider = ScriptedProvider::new(vec![
            tool_response("get_recent_events", "{}"),
            tool_response("get_recent_events", "{}"),
            tool_response("get_recent_events", "{}"),
            tool_response("get_recent_events", "{}"),
            tool_response("get_recent_events", "{}"),
        ]);
        let executor = RecordingExecutor::new(false);
        let out = run_dispatch_loop(
            &provider,
            &executor,
            &user_turn("loop forever"),
            &opts(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(out.truncated);
        assert!(out.reply.contains("tool-call limit"));
        assert_eq!(executor.calls.lock().unwrap().len(), MAX_ITERATIONS);
    }

    #[tokio::test]
    async fn cancellation_aborts_before_persisting() {
        let provider = ScriptedProvider::new(vec![text_response("never seen")]);
        let executor = RecordingExecutor::new(false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_dispatch_loop(
            &provider,
            &executor,
            &user_turn("hi"),
            &opts(),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
    }

    #[tokio::test]
    async fn thinking_is_stripped_from_reply() {
        let provider = ScriptedProvider::new(vec![text_response(
            "<think>query the archive</think>No critical events today.",
        )]);
        let executor = RecordingExecutor::new(false);
        let out = run_dispatch_loop(
            &provider,
            &executor,
            &user_turn("status?"),
            &opts(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(out.reply, "No critical events today.");
        assert_eq!(out.thinking.as_deref(), Some("query the archive"));
        assert_eq!(out.new_messages[0]["content"], "No critical events today.");
    }
}
