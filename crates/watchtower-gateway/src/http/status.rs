use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use watchtower_core::error::WatchtowerError;

use crate::app::AppState;
use crate::http::auth::require_user;
use crate::http::error::{ApiError, ApiResult};

/// GET /api/tools — the tool catalog as advertised to the chat model.
pub async fn tools(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_user(&state, &headers)?;
    let tools = state
        .executor
        .tools()
        .await
        .map_err(|e| ApiError(WatchtowerError::Upstream(e.to_string())))?;
    Ok(Json(json!({
        "count": tools.len(),
        "tools": tools,
    })))
}

/// GET /api/status — component health snapshot.
pub async fn status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_user(&state, &headers)?;
    let cfg = state.config.current();
    let watermark = state.archive.watermark()?;
    let (session_count, message_count) = state.sessions.stats()?;

    Ok(Json(json!({
        "status": "ok",
        "archive": {
            "events": state.archive.count_events()?,
            "watermark": watermark.timestamp,
            "total_appended": watermark.total_appended,
        },
        "retrieval": {
            "semantic_ready": state.engine.semantic_ready(),
            "indexed_vectors": state.engine.indexed_count(),
        },
        "alerts": {
            "subscribers": state.monitor.subscriber_count(),
        },
        "sessions": {
            "sessions": session_count,
            "messages": message_count,
        },
        "model": {
            "endpoint": cfg.model.base_url,
            "model": cfg.model.model,
        },
    })))
}

/// GET /api/dashboard — count aggregates for the overview page.
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_user(&state, &headers)?;
    let cfg = state.config.current();
    let thresholds = &cfg.thresholds;

    let last_24h = state.archive.count_at_least(0, 24)?;
    let critical = state
        .archive
        .count_at_least(thresholds.critical_level, 24)?;
    let high = state.archive.count_at_least(thresholds.high_level, 24)? - critical;
    let medium = state.archive.count_at_least(thresholds.medium_level, 24)? - critical - high;

    let top_agents = state.archive.agent_statistics()?;
    let top_rules = state.archive.rule_statistics(5)?;

    Ok(Json(json!({
        "totals": {
            "all_time": state.archive.count_events()?,
            "last_24h": last_24h,
        },
        "severity_24h": {
            "critical": critical,
            "high": high.max(0),
            "medium": medium.max(0),
        },
        "top_agents": top_agents.into_iter().take(5).collect::<Vec<_>>(),
        "top_rules": top_rules,
    })))
}
