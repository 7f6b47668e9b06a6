use async_trait::async_trait;
use tracing::info;

use watchtower_alerts::{Notifier, NotifyError};

/// Fallback transport for deployments without a Telegram token: alerts land
/// in the process log instead of a chat. Never fails.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: &str, message: &str) -> Result<(), NotifyError> {
        info!(recipient, %message, "alert (log transport)");
        Ok(())
    }
}
