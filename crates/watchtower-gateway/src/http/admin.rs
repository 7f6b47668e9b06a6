use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use watchtower_core::config::WatchtowerConfig;
use watchtower_core::error::WatchtowerError;

use crate::app::AppState;
use crate::http::auth::require_admin;
use crate::http::error::{ApiError, ApiResult};

/// GET /api/admin/config — the full configuration document.
pub async fn get_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let cfg = state.config.current();
    let doc = serde_json::to_value(cfg.as_ref())
        .map_err(|e| ApiError(WatchtowerError::Internal(e.to_string())))?;
    Ok(Json(doc))
}

/// PUT /api/admin/config — replace the document.
///
/// Persists to the config file and swaps the live handle; components pick
/// the new values up at their next boundary read (the alert monitor's
/// thresholds and poll interval take effect on its next tick).
pub async fn put_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(document): Json<Value>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;

    let config: WatchtowerConfig = serde_json::from_value(document)
        .map_err(|e| ApiError(WatchtowerError::BadInput(format!("invalid config: {e}"))))?;

    config
        .save(&state.config_path)
        .map_err(|e| ApiError(WatchtowerError::Internal(e.to_string())))?;
    state.config.replace(config);

    Ok(Json(json!({ "status": "ok" })))
}
