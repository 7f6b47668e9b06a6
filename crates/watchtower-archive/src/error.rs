use thiserror::Error;

/// Errors from archive store operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A timestamp column did not parse as RFC3339.
    ///
    /// Only reachable when the file was written by something other than the
    /// ingest pipeline, which normalizes timestamps before insert.
    #[error("invalid timestamp in archive: {0}")]
    InvalidTimestamp(String),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
