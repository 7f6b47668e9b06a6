//! Telegram command surface: alert subscription commands plus free-text
//! questions routed through the chat dispatch loop.
//!
//! Long polling — no public URL required. Any chat may subscribe; the
//! subscriber cap is the only admission control.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use watchtower_agent::{run_dispatch_loop, DispatchOptions, LlmProvider, ToolExecutor};
use watchtower_alerts::AlertMonitor;
use watchtower_core::config::ConfigHandle;

use crate::send::send_chunked;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "snake_case")]
enum Command {
    #[command(description = "subscribe this chat to realtime security alerts")]
    EnableAlerts,
    #[command(description = "unsubscribe this chat from alerts")]
    DisableAlerts,
    #[command(description = "show monitoring status")]
    Status,
    #[command(description = "show available commands")]
    Help,
}

/// Everything the message handler needs, shared across updates.
pub struct BotContext {
    pub config: ConfigHandle,
    pub monitor: AlertMonitor,
    pub provider: Arc<dyn LlmProvider>,
    pub executor: Arc<dyn ToolExecutor>,
}

/// Telegram adapter: wraps a teloxide `Bot` and drives the long-polling
/// dispatcher for the life of the process.
pub struct TelegramAdapter {
    bot: Bot,
    ctx: Arc<BotContext>,
}

impl TelegramAdapter {
    pub fn new(bot: Bot, ctx: Arc<BotContext>) -> Self {
        Self { bot, ctx }
    }

    pub async fn run(self) {
        info!("telegram adapter starting long-polling dispatcher");

        let handler = Update::filter_message().endpoint(handle_message);

        Dispatcher::builder(self.bot, handler)
            .dependencies(dptree::deps![self.ctx])
            .default_handler(|_| async {})
            .build()
            .dispatch()
            .await;
    }
}

async fn handle_message(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let chat_id = msg.chat.id;

    if let Ok(command) = Command::parse(text, "watchtower") {
        handle_command(&bot, chat_id, command, &ctx).await;
        return Ok(());
    }

    // Anything else is a question for the assistant.
    handle_question(&bot, chat_id, text, &ctx).await;
    Ok(())
}

async fn handle_command(bot: &Bot, chat_id: ChatId, command: Command, ctx: &BotContext) {
    let reply = match command {
        Command::EnableAlerts => match ctx.monitor.subscribe(&chat_id.to_string()) {
            Ok(true) => "Realtime alerts enabled. You will be notified of new \
                         medium, high, and critical severity events."
                .to_string(),
            Ok(false) => "Alerts are already enabled for this chat.".to_string(),
            Err(reason) => format!("Cannot subscribe: {reason}."),
        },
        Command::DisableAlerts => {
            if ctx.monitor.unsubscribe(&chat_id.to_string()) {
                "Realtime alerts disabled.".to_string()
            } else {
                "This chat was not subscribed.".to_string()
            }
        }
        Command::Status => {
            let subscribed = ctx.monitor.is_subscribed(&chat_id.to_string());
            format!(
                "Alert monitoring: {} subscriber(s). This chat: {}.",
                ctx.monitor.subscriber_count(),
                if subscribed { "subscribed" } else { "not subscribed" },
            )
        }
        Command::Help => {
            "Commands:\n\
             /enable_alerts - subscribe to realtime security alerts\n\
             /disable_alerts - unsubscribe\n\
             /status - monitoring status\n\
             Send any other message to ask about archived security events."
                .to_string()
        }
    };
    send_chunked(bot, chat_id, &reply).await;
}

async fn handle_question(bot: &Bot, chat_id: ChatId, text: &str, ctx: &BotContext) {
    let cfg = ctx.config.current();
    let opts = DispatchOptions {
        model: cfg.model.model.clone(),
        max_tokens: cfg.model.max_tokens,
        temperature: cfg.model.temperature,
    };
    let history = vec![serde_json::json!({"role": "user", "content": text})];

    let outcome = run_dispatch_loop(
        ctx.provider.as_ref(),
        ctx.executor.as_ref(),
        &history,
        &opts,
        &CancellationToken::new(),
    )
    .await;

    match outcome {
        Ok(out) => send_chunked(bot, chat_id, &out.reply).await,
        Err(e) => {
            warn!(error = %e, "telegram question failed");
            send_chunked(
                bot,
                chat_id,
                "Sorry, the assistant is unavailable right now.",
            )
            .await;
        }
    }
}
