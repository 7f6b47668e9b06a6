use async_trait::async_trait;
use thiserror::Error;

/// Failure modes of a notification transport.
///
/// `Blocked` is permanent — the recipient is pruned from the subscriber set.
/// Everything else is transient and simply retried on a later tick.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("recipient blocked delivery")]
    Blocked,

    #[error("transient send failure: {0}")]
    Transient(String),
}

/// Push transport for alert notifications, keyed by an opaque recipient id.
/// Messages are plain text, at most 4096 bytes.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, message: &str) -> Result<(), NotifyError>;
}
