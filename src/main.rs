//! Customer OTP Bot - Main Entry Point
//!
//! A Telegram bot that fetches one-time passcodes from a disposable
//! inbox, with a per-user quota and a cooldown between requests.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use customer_otp_bot::commands::CommandHandler;
use customer_otp_bot::config::BotConfig;
use customer_otp_bot::fetcher::HttpInboxFetcher;
use customer_otp_bot::ledger::LedgerStore;
use customer_otp_bot::orchestrator::{OrchestratorSettings, RequestOrchestrator};
use customer_otp_bot::telegram::TelegramBot;

/// Telegram bot that fetches OTP codes from a disposable inbox.
#[derive(Parser, Debug)]
#[command(name = "otp_bot")]
#[command(about = "Fetch one-time passcodes from a disposable inbox over Telegram")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    let config = BotConfig::from_env().context("Failed to load configuration from environment")?;

    info!(
        "Allowed domain: {}, limit: {} per user, delay: {}s, cooldown: {}s",
        config.allowed_domain, config.max_requests_per_user, config.delay_secs, config.cooldown_secs
    );
    info!("{} admin(s) configured", config.admin_ids.len());

    let ledger = Arc::new(LedgerStore::open(&config.state_file));
    info!("Ledger file: {}", ledger.path().display());

    let fetcher = HttpInboxFetcher::new(config.fetch.clone())
        .context("Failed to create inbox fetcher")?;

    let orchestrator = Arc::new(RequestOrchestrator::new(
        ledger,
        Arc::new(fetcher),
        OrchestratorSettings::from(&config),
    ));

    let bot = TelegramBot::connect(&config.bot_token)
        .await
        .context("Failed to connect to Telegram")?;

    let handler = Arc::new(CommandHandler::new(
        orchestrator,
        config.admin_ids.clone(),
        bot.username(),
    ));

    info!("Starting OTP bot...");
    bot.run(handler).await;

    info!("Shutting down...");
    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
