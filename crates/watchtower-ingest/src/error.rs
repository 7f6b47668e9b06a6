use thiserror::Error;

/// Errors from the ingest pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The container exec failed or produced unusable output.
    /// Logged and retried on the next tick — never fatal.
    #[error("log source error: {0}")]
    Source(String),

    /// The archive rejected a batch; the transaction was rolled back and the
    /// watermark is unchanged.
    #[error(transparent)]
    Archive(#[from] watchtower_archive::ArchiveError),
}

pub type Result<T> = std::result::Result<T, IngestError>;
