use thiserror::Error;

/// Coarse classification of a failure, used to pick HTTP status codes and
/// tool-result error shapes at the process edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigMissing,
    AuthFailed,
    Forbidden,
    NotFound,
    Conflict,
    BadInput,
    UpstreamUnavailable,
    Internal,
}

impl ErrorKind {
    /// HTTP status code for this kind.
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::ConfigMissing => 500,
            ErrorKind::AuthFailed => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::BadInput => 400,
            ErrorKind::UpstreamUnavailable => 500,
            ErrorKind::Internal => 500,
        }
    }

    /// Short error code string included in API error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ConfigMissing => "CONFIG_MISSING",
            ErrorKind::AuthFailed => "AUTH_FAILED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::BadInput => "BAD_INPUT",
            ErrorKind::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

/// Process-wide error type carrying the §7-style kind plus a message.
///
/// Subsystem crates define their own narrow error enums; this type is what
/// crosses the gateway boundary, so messages must never contain secrets or
/// backtraces.
#[derive(Debug, Error)]
pub enum WatchtowerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WatchtowerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WatchtowerError::Config(_) => ErrorKind::ConfigMissing,
            WatchtowerError::AuthFailed => ErrorKind::AuthFailed,
            WatchtowerError::Forbidden(_) => ErrorKind::Forbidden,
            WatchtowerError::NotFound(_) => ErrorKind::NotFound,
            WatchtowerError::Conflict(_) => ErrorKind::Conflict,
            WatchtowerError::BadInput(_) => ErrorKind::BadInput,
            WatchtowerError::Upstream(_) => ErrorKind::UpstreamUnavailable,
            WatchtowerError::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchtowerError>;
