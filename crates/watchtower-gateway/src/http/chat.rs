use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use watchtower_agent::{run_dispatch_loop, AgentError, DispatchOptions};
use watchtower_core::error::WatchtowerError;

use crate::app::AppState;
use crate::http::auth::require_user;
use crate::http::error::{ApiError, ApiResult};

/// System prompt persisted as the first message of every new session.
const SYSTEM_PROMPT: &str = "You are Watchtower, a security-operations assistant for a Wazuh SIEM \
deployment. Use the available tools to consult the event archive before \
answering, cite event ids, and say so plainly when the archive has no \
relevant data.";

#[derive(Deserialize)]
pub struct ChatTurnRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// POST /api/chat — run one dispatch-loop turn against the caller's session.
///
/// A second concurrent turn on the same session is rejected with 409. If the
/// client disconnects, the handler future is dropped: the loop aborts at its
/// next await and nothing from the turn is persisted (the turn guard removes
/// the in-flight marker on drop).
pub async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatTurnRequest>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    if req.message.trim().is_empty() {
        return Err(ApiError(WatchtowerError::BadInput(
            "message cannot be empty".to_string(),
        )));
    }

    // Resolve or create the session.
    let session = match &req.session_id {
        Some(id) => state
            .sessions
            .get_session(id, &user.id)?
            .ok_or_else(|| ApiError(WatchtowerError::NotFound("session".to_string())))?,
        None => {
            let session = state.sessions.create_session(&user.id, None)?;
            state
                .sessions
                .add_message(&session.id, "system", SYSTEM_PROMPT, None, None)?;
            session
        }
    };

    // One dispatch loop per session at a time.
    let _guard = TurnGuard::acquire(&state.active_turns, &session.id)?;
    let cancel = state
        .active_turns
        .get(&session.id)
        .map(|entry| entry.value().clone())
        .unwrap_or_default();

    // Persist the user turn, then rebuild the model-facing history.
    state
        .sessions
        .add_message(&session.id, "user", &req.message, None, None)?;
    let history = build_history(&state, &session.id)?;

    let cfg = state.config.current();
    let opts = DispatchOptions {
        model: cfg.model.model.clone(),
        max_tokens: cfg.model.max_tokens,
        temperature: cfg.model.temperature,
    };

    let outcome = run_dispatch_loop(
        state.provider.as_ref(),
        state.executor.as_ref(),
        &history,
        &opts,
        &cancel,
    )
    .await
    .map_err(map_agent_error)?;

    // Persist the turn's transcript exactly as exchanged.
    let mut tool_payloads: Vec<Value> = Vec::new();
    for message in &outcome.new_messages {
        let role = message["role"].as_str().unwrap_or("assistant");
        match role {
            "assistant" => {
                let content = message["content"].as_str().unwrap_or("");
                let tool_calls = message.get("tool_calls");
                let is_final = tool_calls.is_none();
                state.sessions.add_message(
                    &session.id,
                    "assistant",
                    content,
                    tool_calls,
                    if is_final { outcome.thinking.as_deref() } else { None },
                )?;
            }
            "tool" => {
                let content = message["content"].as_str().unwrap_or("");
                tool_payloads.push(json!({
                    "tool_call_id": message["tool_call_id"],
                    "result": serde_json::from_str::<Value>(content)
                        .unwrap_or_else(|_| json!(content)),
                }));
                state
                    .sessions
                    .add_message(&session.id, "tool", content, None, None)?;
            }
            other => {
                warn!(role = other, "unexpected dispatch message role");
            }
        }
    }

    Ok(Json(json!({
        "response": outcome.reply,
        "thinking": outcome.thinking,
        "tool_calls": tool_payloads,
        "truncated": outcome.truncated,
        "session_id": session.id,
    })))
}

/// Rebuild the OpenAI-format history for a session from its stored
/// transcript. Only system/user text and final assistant text are replayed —
/// past tool exchanges already produced their answers and would otherwise
/// need their full call/result pairing to be a valid sequence.
fn build_history(state: &AppState, session_id: &str) -> ApiResult<Vec<Value>> {
    let stored = state.sessions.get_messages(session_id, 200)?;
    let mut history = Vec::new();
    for message in stored {
        match message.role.as_str() {
            "system" | "user" => {
                history.push(json!({"role": message.role, "content": message.content}));
            }
            "assistant" if message.tool_calls.is_none() && !message.content.is_empty() => {
                history.push(json!({"role": "assistant", "content": message.content}));
            }
            _ => {}
        }
    }
    // Sessions created through POST /api/sessions have no stored system turn.
    if history.first().map(|m| m["role"] != "system").unwrap_or(true) {
        history.insert(0, json!({"role": "system", "content": SYSTEM_PROMPT}));
    }
    Ok(history)
}

fn map_agent_error(e: AgentError) -> ApiError {
    let mapped = match e {
        AgentError::Cancelled => WatchtowerError::Conflict("request cancelled".to_string()),
        AgentError::Http(err) => WatchtowerError::Upstream(err.to_string()),
        AgentError::Api { status, .. } => {
            WatchtowerError::Upstream(format!("model endpoint returned {status}"))
        }
        AgentError::Bridge(msg) => WatchtowerError::Upstream(msg),
        AgentError::Parse(msg) => WatchtowerError::Internal(msg),
    };
    ApiError(mapped)
}

/// Marks a session as having a turn in flight; removal happens on drop so a
/// disconnected client can never wedge its session.
struct TurnGuard {
    map: Arc<DashMap<String, CancellationToken>>,
    key: String,
}

impl TurnGuard {
    fn acquire(
        map: &Arc<DashMap<String, CancellationToken>>,
        session_id: &str,
    ) -> ApiResult<Self> {
        use dashmap::mapref::entry::Entry;
        match map.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(ApiError(WatchtowerError::Conflict(
                "another turn is already running on this session".to_string(),
            ))),
            Entry::Vacant(slot) => {
                slot.insert(CancellationToken::new());
                Ok(Self {
                    map: map.clone(),
                    key: session_id.to_string(),
                })
            }
        }
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}
