use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use watchtower_core::error::WatchtowerError;

use crate::app::AppState;
use crate::http::auth::require_user;
use crate::http::error::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateSessionRequest {
    pub title: String,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// GET /api/sessions — the caller's sessions, most recently updated first.
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let sessions = state.sessions.list_sessions(&user.id, 50)?;
    Ok(Json(json!({ "sessions": sessions })))
}

/// POST /api/sessions — create a session.
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let user = require_user(&state, &headers)?;
    let session = state
        .sessions
        .create_session(&user.id, req.title.as_deref())?;
    Ok((StatusCode::CREATED, Json(json!({ "session": session }))))
}

/// GET /api/sessions/{id}
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let session = state
        .sessions
        .get_session(&id, &user.id)?
        .ok_or_else(|| ApiError(WatchtowerError::NotFound("session".to_string())))?;
    Ok(Json(json!({ "session": session })))
}

/// PUT /api/sessions/{id} — rename.
pub async fn update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateSessionRequest>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    if req.title.trim().is_empty() {
        return Err(ApiError(WatchtowerError::BadInput(
            "title cannot be empty".to_string(),
        )));
    }
    state.sessions.rename_session(&id, &user.id, &req.title)?;
    Ok(Json(json!({ "status": "ok" })))
}

/// DELETE /api/sessions/{id} — removes the session and all its messages.
pub async fn delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    state.sessions.delete_session(&id, &user.id)?;
    Ok(Json(json!({ "status": "ok" })))
}

/// GET /api/sessions/{id}/messages — full transcript in insertion order.
pub async fn messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    // Scope check before reading messages.
    state
        .sessions
        .get_session(&id, &user.id)?
        .ok_or_else(|| ApiError(WatchtowerError::NotFound("session".to_string())))?;
    let messages = state.sessions.get_messages(&id, 1000)?;
    Ok(Json(json!({ "messages": messages })))
}

/// GET /api/sessions/search?q=term
pub async fn search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let sessions = state
        .sessions
        .search_sessions(&user.id, &query.q, query.limit)?;
    Ok(Json(json!({ "sessions": sessions })))
}
