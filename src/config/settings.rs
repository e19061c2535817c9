//! Environment-sourced bot settings.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{
    DEFAULT_ALLOWED_DOMAIN, DEFAULT_COOLDOWN_SECS, DEFAULT_DELAY_SECS, DEFAULT_ERROR_EXIT_THRESHOLD,
    DEFAULT_INBOX_BASE_URL, DEFAULT_MAX_REQUESTS,
};

/// Settings for the inbox page fetcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchSettings {
    /// URL prefix the email address is appended to.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts per fetch, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_base_url() -> String {
    DEFAULT_INBOX_BASE_URL.to_owned()
}

const fn default_timeout_secs() -> u64 {
    12
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_backoff_ms() -> u64 {
    2000
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl FetchSettings {
    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff between attempts as a [`Duration`].
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Complete bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Telegram Bot API token.
    pub bot_token: String,

    /// User ids allowed to run admin commands.
    #[serde(default)]
    pub admin_ids: HashSet<u64>,

    /// The only email domain accepted by `/otp` (lower-cased).
    pub allowed_domain: String,

    /// Successful fetches allowed per user before the quota gate closes.
    pub max_requests_per_user: u32,

    /// Fixed wait before every inbox fetch, in seconds.
    pub delay_secs: u64,

    /// Cooldown armed after every completed fetch, in seconds.
    pub cooldown_secs: u64,

    /// Path to the JSON ledger file.
    pub state_file: PathBuf,

    /// Consecutive fetch errors that make the process exit (0 disables).
    pub error_exit_threshold: u32,

    /// Inbox fetcher settings.
    #[serde(default)]
    pub fetch: FetchSettings,
}

impl BotConfig {
    /// Creates a configuration with defaults and the given token.
    #[must_use]
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            admin_ids: HashSet::new(),
            allowed_domain: DEFAULT_ALLOWED_DOMAIN.to_owned(),
            max_requests_per_user: DEFAULT_MAX_REQUESTS,
            delay_secs: DEFAULT_DELAY_SECS,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            state_file: PathBuf::from("state.json"),
            error_exit_threshold: DEFAULT_ERROR_EXIT_THRESHOLD,
            fetch: FetchSettings::default(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `TG_TOKEN` to be set; everything else has a default.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is missing or a value cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup("TG_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingEnvVar("TG_TOKEN"))?;

        let defaults = Self::new(bot_token);

        let admin_ids = parse_admin_ids(lookup("ADMIN_IDS").as_deref().unwrap_or(""))?;

        let allowed_domain = lookup("ALLOWED_DOMAIN")
            .map_or(defaults.allowed_domain, |d| d.trim().to_lowercase());
        if allowed_domain.is_empty() || allowed_domain.contains('@') {
            return Err(ConfigError::InvalidDomain(allowed_domain));
        }

        let fetch = FetchSettings {
            base_url: lookup("INBOX_BASE_URL").unwrap_or(defaults.fetch.base_url),
            timeout_secs: parse_or(&lookup, "FETCH_TIMEOUT_SECONDS", defaults.fetch.timeout_secs)?,
            max_attempts: parse_or(&lookup, "FETCH_ATTEMPTS", defaults.fetch.max_attempts)?.max(1),
            backoff_ms: parse_or(&lookup, "FETCH_BACKOFF_MS", defaults.fetch.backoff_ms)?,
        };

        Ok(Self {
            bot_token: defaults.bot_token,
            admin_ids,
            allowed_domain,
            max_requests_per_user: parse_or(
                &lookup,
                "MAX_REQUESTS_PER_USER",
                defaults.max_requests_per_user,
            )?,
            delay_secs: parse_or(&lookup, "DELAY_SECONDS", defaults.delay_secs)?,
            cooldown_secs: parse_or(&lookup, "COOLDOWN_SECONDS", defaults.cooldown_secs)?,
            state_file: lookup("STATE_FILE").map_or(defaults.state_file, PathBuf::from),
            error_exit_threshold: parse_or(
                &lookup,
                "ERROR_EXIT_THRESHOLD",
                defaults.error_exit_threshold,
            )?,
            fetch,
        })
    }

    /// Returns true if the user may run admin commands.
    #[must_use]
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

/// Parses a comma-separated list of user ids, ignoring blank entries.
fn parse_admin_ids(raw: &str) -> Result<HashSet<u64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|_| ConfigError::InvalidAdminId(s.to_owned()))
        })
        .collect()
}

/// Reads and parses a variable, falling back to `default` when it is unset.
fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber { var: key, value: raw })
        }
        _ => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid value for {var}: '{value}' (expected a non-negative integer)")]
    InvalidNumber { var: &'static str, value: String },

    #[error("Invalid admin id in ADMIN_IDS: '{0}'")]
    InvalidAdminId(String),

    #[error("Invalid allowed domain: '{0}'")]
    InvalidDomain(String),
}
