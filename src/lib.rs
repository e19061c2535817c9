//! Customer OTP Bot Library
//!
//! A Telegram bot that reads one-time passcodes from a disposable inbox.
//!
//! This crate provides the core functionality for:
//! - Loading the bot configuration from the environment
//! - Tracking per-user quota, cooldowns, and last delivered codes
//! - Fetching the inbox page and extracting the first 6-digit code
//! - Handling user and admin commands via chat messages

pub mod commands;
pub mod config;
pub mod fetcher;
pub mod ledger;
pub mod orchestrator;
pub mod telegram;
