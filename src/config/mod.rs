//! Configuration module for the OTP bot.
//!
//! Handles loading and validation of the bot configuration from the
//! environment, including quota, timing, and inbox fetcher settings.

mod settings;

pub use settings::{BotConfig, ConfigError, FetchSettings};

/// Email domain accepted when `ALLOWED_DOMAIN` is unset.
pub const DEFAULT_ALLOWED_DOMAIN: &str = "yotomail.com";

/// Inbox page prefix the requested address is appended to.
pub const DEFAULT_INBOX_BASE_URL: &str = "https://generator.email/";

/// Successful fetches allowed per user.
pub const DEFAULT_MAX_REQUESTS: u32 = 10;

/// Wait before checking the inbox, in seconds.
pub const DEFAULT_DELAY_SECS: u64 = 30;

/// Cooldown after a completed fetch, in seconds.
pub const DEFAULT_COOLDOWN_SECS: u64 = 120;

/// Consecutive fetch errors before the process exits.
pub const DEFAULT_ERROR_EXIT_THRESHOLD: u32 = 5;
