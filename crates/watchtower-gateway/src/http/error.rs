use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use watchtower_core::error::WatchtowerError;
use watchtower_sessions::SessionStoreError;

/// HTTP-facing error: a §7-style kind rendered with its status code. Never
/// carries internals — store/provider errors are reduced to their kind and a
/// short message before they get here.
pub struct ApiError(pub WatchtowerError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status =
            StatusCode::from_u16(kind.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "error": {
                "code": kind.code(),
                "message": self.0.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

impl From<WatchtowerError> for ApiError {
    fn from(e: WatchtowerError) -> Self {
        ApiError(e)
    }
}

impl From<SessionStoreError> for ApiError {
    fn from(e: SessionStoreError) -> Self {
        let mapped = match e {
            SessionStoreError::AuthFailed => WatchtowerError::AuthFailed,
            SessionStoreError::NotFound(what) => WatchtowerError::NotFound(what.to_string()),
            SessionStoreError::Conflict(msg) => WatchtowerError::Conflict(msg),
            SessionStoreError::BadInput(msg) => WatchtowerError::BadInput(msg),
            SessionStoreError::Database(err) => WatchtowerError::Internal(err.to_string()),
            SessionStoreError::Hash(err) => WatchtowerError::Internal(err),
        };
        ApiError(mapped)
    }
}

impl From<watchtower_archive::ArchiveError> for ApiError {
    fn from(e: watchtower_archive::ArchiveError) -> Self {
        ApiError(WatchtowerError::Internal(e.to_string()))
    }
}

impl From<watchtower_retrieval::RetrievalError> for ApiError {
    fn from(e: watchtower_retrieval::RetrievalError) -> Self {
        ApiError(WatchtowerError::Internal(e.to_string()))
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
