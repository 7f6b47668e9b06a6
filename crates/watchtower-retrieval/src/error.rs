use thiserror::Error;

/// Errors from the retrieval engine.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Archive(#[from] watchtower_archive::ArchiveError),

    /// The embedding model failed to load or encode. The hybrid retriever
    /// degrades to keyword-only on this; it is never surfaced to a caller of
    /// `search`.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// A background task was cancelled or panicked.
    #[error("task error: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
