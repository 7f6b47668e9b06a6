use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::{ApiError, RequestError};

use watchtower_alerts::{Notifier, NotifyError};

use crate::send::split_chunks;

/// Alert transport over the Telegram Bot API. Recipient ids are chat ids
/// rendered as decimal strings.
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, recipient: &str, message: &str) -> Result<(), NotifyError> {
        let chat_id: i64 = recipient
            .parse()
            .map_err(|_| NotifyError::Transient(format!("invalid chat id: {recipient}")))?;

        for chunk in split_chunks(message) {
            self.bot
                .send_message(ChatId(chat_id), chunk)
                .await
                .map_err(classify)?;
        }
        Ok(())
    }
}

/// Map Telegram's failure taxonomy onto the transport contract: a blocked or
/// deactivated recipient is permanent, everything else retries.
fn classify(err: RequestError) -> NotifyError {
    match &err {
        RequestError::Api(ApiError::BotBlocked)
        | RequestError::Api(ApiError::UserDeactivated)
        | RequestError::Api(ApiError::ChatNotFound) => NotifyError::Blocked,
        _ => NotifyError::Transient(err.to_string()),
    }
}
