use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use watchtower_agent::{LlmProvider, ToolExecutor};
use watchtower_alerts::AlertMonitor;
use watchtower_archive::ArchiveStore;
use watchtower_core::config::ConfigHandle;
use watchtower_retrieval::{CagBuilder, RetrievalEngine};
use watchtower_sessions::SessionStore;

/// Central shared state — passed as `Arc<AppState>` to every handler.
pub struct AppState {
    pub config: ConfigHandle,
    /// Where PUT /api/admin/config persists the document.
    pub config_path: String,
    pub archive: Arc<ArchiveStore>,
    pub sessions: Arc<SessionStore>,
    pub engine: Arc<RetrievalEngine>,
    pub cag: Arc<CagBuilder>,
    pub provider: Arc<dyn LlmProvider>,
    pub executor: Arc<dyn ToolExecutor>,
    pub monitor: AlertMonitor,
    /// Bearer token -> user id. Tokens live for the process lifetime or
    /// until logout.
    pub tokens: DashMap<String, String>,
    /// Sessions with a dispatch loop in flight. A second concurrent turn on
    /// the same session is rejected with 409.
    pub active_turns: Arc<DashMap<String, CancellationToken>>,
}

/// Assemble the full router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/register", post(crate::http::auth::register))
        .route("/api/login", post(crate::http::auth::login))
        .route("/api/logout", post(crate::http::auth::logout))
        .route(
            "/api/sessions",
            get(crate::http::sessions::list).post(crate::http::sessions::create),
        )
        .route(
            "/api/sessions/search",
            get(crate::http::sessions::search),
        )
        .route(
            "/api/sessions/{id}",
            get(crate::http::sessions::get_one)
                .put(crate::http::sessions::update)
                .delete(crate::http::sessions::delete),
        )
        .route(
            "/api/sessions/{id}/messages",
            get(crate::http::sessions::messages),
        )
        .route("/api/chat", post(crate::http::chat::chat))
        .route("/api/tools", get(crate::http::status::tools))
        .route("/api/status", get(crate::http::status::status))
        .route("/api/dashboard", get(crate::http::status::dashboard))
        .route(
            "/api/admin/config",
            get(crate::http::admin::get_config).put(crate::http::admin::put_config),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
