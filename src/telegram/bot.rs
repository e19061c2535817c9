//! Telegram bot wrapper around the teloxide dispatcher.

use std::sync::Arc;

use teloxide::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use crate::commands::CommandHandler;

/// Errors that can occur during Telegram operations.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Telegram request failed: {0}")]
    Request(#[from] teloxide::RequestError),
}

/// Long-polling Telegram bot that feeds messages to the command handler.
pub struct TelegramBot {
    /// The underlying teloxide bot.
    bot: Bot,

    /// The bot's own username, used to recognize `/command@username`.
    username: String,
}

impl TelegramBot {
    /// Verifies the token with Telegram and learns the bot's username.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is rejected by Telegram.
    pub async fn connect(token: &str) -> Result<Self, TelegramError> {
        info!("Connecting to Telegram...");
        let bot = Bot::new(token);
        let me = bot.get_me().await?;
        let username = me.username().to_owned();
        info!("Connected as @{}", username);

        Ok(Self { bot, username })
    }

    /// Returns the bot's username without the leading `@`.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Processes updates until Ctrl+C.
    pub async fn run(self, handler: Arc<CommandHandler>) {
        Dispatcher::builder(self.bot, Update::filter_message().endpoint(on_message))
            .dependencies(dptree::deps![handler])
            .default_handler(|_| async {})
            .error_handler(LoggingErrorHandler::with_custom_text(
                "Failed to answer a message",
            ))
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        info!("Dispatcher stopped");
    }
}

/// Replies to a single message. An admitted `/otp` gets two replies: the
/// waiting notice right away and the result after the fetch.
async fn on_message(bot: Bot, msg: Message, handler: Arc<CommandHandler>) -> ResponseResult<()> {
    let (Some(text), Some(user)) = (msg.text(), msg.from.as_ref()) else {
        return Ok(());
    };

    let Some(result) = handler.try_handle(user.id.0, text).await else {
        debug!("Ignoring non-command message from {}", user.id);
        return Ok(());
    };

    bot.send_message(msg.chat.id, result.message).await?;

    if let Some(admission) = result.pending {
        let outcome = handler.finish_otp(admission).await;
        bot.send_message(msg.chat.id, outcome.message).await?;
    }

    Ok(())
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}
