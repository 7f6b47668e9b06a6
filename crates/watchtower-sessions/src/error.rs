use thiserror::Error;

/// Errors from the session/user store.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Uniform authentication failure — deliberately does not say whether
    /// the username exists.
    #[error("authentication failed")]
    AuthFailed,

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Username or email already registered.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad input: {0}")]
    BadInput(String),

    /// Password hashing failed — an internal condition, not a user error.
    #[error("hash error: {0}")]
    Hash(String),
}

pub type Result<T> = std::result::Result<T, SessionStoreError>;
