use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use watchtower_core::error::WatchtowerError;
use watchtower_sessions::User;

use crate::app::AppState;
use crate::http::error::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// POST /api/register — create an account and return a fresh bearer token.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let cfg = state.config.current();
    if !cfg.security.registration_open {
        return Err(ApiError(WatchtowerError::Conflict(
            "registration is closed".to_string(),
        )));
    }
    if req.password.len() < cfg.security.min_password_len {
        return Err(ApiError(WatchtowerError::BadInput(format!(
            "password must be at least {} characters",
            cfg.security.min_password_len
        ))));
    }

    let user = state.sessions.create_user(
        &req.username,
        &req.email,
        &req.password,
        req.full_name.as_deref(),
    )?;
    let token = issue_token(&state, &user.id);

    Ok((
        StatusCode::CREATED,
        Json(json!({ "token": token, "user": user })),
    ))
}

/// POST /api/login — verify credentials and return a bearer token.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<Value>> {
    let user = state.sessions.authenticate(&req.username, &req.password)?;
    let token = issue_token(&state, &user.id);
    Ok(Json(json!({ "token": token, "user": user })))
}

/// POST /api/logout — revoke the presented token.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    if let Some(token) = bearer(&headers) {
        state.tokens.remove(token);
    }
    Ok(Json(json!({ "status": "ok" })))
}

fn issue_token(state: &AppState, user_id: &str) -> String {
    let token = Uuid::new_v4().to_string();
    state.tokens.insert(token.clone(), user_id.to_string());
    token
}

pub(crate) fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Resolve the request's bearer token to a user, or 401.
pub(crate) fn require_user(state: &AppState, headers: &HeaderMap) -> ApiResult<User> {
    let token = bearer(headers).ok_or(ApiError(WatchtowerError::AuthFailed))?;
    let user_id = state
        .tokens
        .get(token)
        .map(|entry| entry.value().clone())
        .ok_or(ApiError(WatchtowerError::AuthFailed))?;
    state
        .sessions
        .get_user(&user_id)?
        .ok_or(ApiError(WatchtowerError::AuthFailed))
}

/// Like [`require_user`] but additionally requires the admin flag (403
/// otherwise).
pub(crate) fn require_admin(state: &AppState, headers: &HeaderMap) -> ApiResult<User> {
    let user = require_user(state, headers)?;
    if !user.is_admin {
        return Err(ApiError(WatchtowerError::Forbidden(
            "admin access required".to_string(),
        )));
    }
    Ok(user)
}
