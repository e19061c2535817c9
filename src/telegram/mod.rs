//! Telegram transport module.
//!
//! Receives messages over Bot API long polling and answers them
//! through the command handler.

mod bot;

pub use bot::{TelegramBot, TelegramError};
