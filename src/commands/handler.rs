//! Command handler implementation.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use super::types::{BotCommand, CommandResult};
use crate::orchestrator::{Admission, OtpError, OtpOutcome, RequestOrchestrator};

/// Activity entries shown by the `log` command.
const LOG_LINES: usize = 20;

/// Handles bot commands on behalf of a Telegram user.
pub struct CommandHandler {
    /// Request orchestrator shared with the transport.
    orchestrator: Arc<RequestOrchestrator>,

    /// Users allowed to run admin commands.
    admin_ids: HashSet<u64>,

    /// This bot's username; `/command@other` is left alone.
    bot_username: String,
}

impl CommandHandler {
    /// Creates a new command handler.
    #[must_use]
    pub fn new(
        orchestrator: Arc<RequestOrchestrator>,
        admin_ids: HashSet<u64>,
        bot_username: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            admin_ids,
            bot_username: bot_username.into(),
        }
    }

    /// Tries to parse and execute a command from a message.
    ///
    /// Returns `None` if the message is not a command.
    pub async fn try_handle(&self, caller: u64, message_text: &str) -> Option<CommandResult> {
        let command = BotCommand::parse(message_text, &self.bot_username)?;

        debug!("Handling command from {}: {}", caller, command);
        let result = self.execute(caller, command).await;
        info!(
            "Command result for {}: success={}, pending={}",
            caller,
            result.success,
            result.pending.is_some()
        );

        Some(result)
    }

    /// Executes a parsed command.
    async fn execute(&self, caller: u64, command: BotCommand) -> CommandResult {
        if command.is_admin_only() && !self.admin_ids.contains(&caller) {
            debug!("Rejected admin command {} from {}", command.name(), caller);
            return CommandResult::error("Admin only.");
        }

        match command {
            BotCommand::Start => self.handle_start(),
            BotCommand::Otp(email) => self.handle_otp(caller, email.as_deref()).await,
            BotCommand::Remaining => self.handle_remaining(caller).await,
            BotCommand::ResetLimit(target) => self.handle_reset_limit(target.as_deref()).await,
            BotCommand::ClearEmail(email) => self.handle_clear_email(email.as_deref()).await,
            BotCommand::Log => self.handle_log().await,
        }
    }

    /// Runs the delayed half of an admitted OTP request and formats the reply.
    pub async fn finish_otp(&self, admission: Admission) -> CommandResult {
        match self.orchestrator.complete(admission).await {
            Ok(OtpOutcome::Found {
                email,
                code,
                remaining,
                stale,
            }) => {
                let warning = if stale {
                    "Warning: same as last OTP, might be old.\n\n"
                } else {
                    ""
                };
                CommandResult::success(format!(
                    "{warning}Your OTP for {email} is: {code}\nRemaining requests: {remaining}"
                ))
            }
            Ok(OtpOutcome::NotFound { .. }) => CommandResult::error("No OTP found yet."),
            Err(e) => CommandResult::error(self.rejection_text(&e)),
        }
    }

    fn handle_start(&self) -> CommandResult {
        let settings = self.orchestrator.settings();
        CommandResult::success(format!(
            "Paste your temp email like:\n\
             /otp yourname@{}\n\n\
             I'll wait {}s before checking your inbox.\n\
             Limit: {} requests per user.",
            settings.allowed_domain,
            settings.delay.as_secs(),
            settings.max_requests
        ))
    }

    async fn handle_otp(&self, caller: u64, email: Option<&str>) -> CommandResult {
        let Some(email) = email else {
            return CommandResult::error(format!(
                "Usage: /otp yourname@{}",
                self.orchestrator.settings().allowed_domain
            ));
        };

        match self.orchestrator.admit(caller, email).await {
            Ok(admission) => CommandResult::success_with_pending(
                format!(
                    "Waiting {} seconds for your OTP…",
                    self.orchestrator.settings().delay.as_secs()
                ),
                admission,
            ),
            Err(e) => CommandResult::error(self.rejection_text(&e)),
        }
    }

    async fn handle_remaining(&self, caller: u64) -> CommandResult {
        let ledger = self.orchestrator.ledger();
        let limit = self.orchestrator.settings().max_requests;
        let used = ledger.usage(caller).await;
        let remaining = limit.saturating_sub(used);

        let mut message = format!("You used {used} of {limit}. Remaining: {remaining}.");
        let cooldown = ledger.remaining_cooldown(caller).await;
        if cooldown > 0 {
            message.push_str(&format!("\nNext request allowed in {cooldown}s."));
        }
        CommandResult::success(message)
    }

    async fn handle_reset_limit(&self, target: Option<&str>) -> CommandResult {
        let Some(target) = target else {
            return CommandResult::error("Usage: /resetlimit <user_id>");
        };
        let Ok(user_id) = target.parse::<u64>() else {
            return CommandResult::error(format!("Invalid user id: '{target}'"));
        };

        self.orchestrator.ledger().reset_usage(user_id).await;
        info!("Admin reset usage for user {}", user_id);
        CommandResult::success(format!("Reset done for {user_id}."))
    }

    async fn handle_clear_email(&self, email: Option<&str>) -> CommandResult {
        let Some(email) = email else {
            return CommandResult::error("Usage: /clearemail <email>");
        };

        if self.orchestrator.ledger().clear_last_code(email).await {
            info!("Admin cleared last OTP for {}", email);
            CommandResult::success(format!("Cleared last OTP memory for {email}."))
        } else {
            CommandResult::success(format!("No stored OTP for {email}."))
        }
    }

    async fn handle_log(&self) -> CommandResult {
        let entries = self.orchestrator.activity().recent(LOG_LINES).await;
        if entries.is_empty() {
            return CommandResult::success("No requests recorded yet.");
        }

        let mut lines = vec![format!("Last {} request(s):", entries.len())];
        lines.extend(entries.iter().map(ToString::to_string));
        CommandResult::success(lines.join("\n"))
    }

    /// User-facing text for a rejected or failed request.
    fn rejection_text(&self, err: &OtpError) -> String {
        match err {
            OtpError::CooldownActive { remaining_secs } => {
                format!("Please wait {remaining_secs} seconds before your next request.")
            }
            OtpError::QuotaExceeded { used, limit } => {
                format!("Limit reached. You used {used}/{limit} requests.")
            }
            OtpError::InvalidEmail(_) => format!(
                "Invalid email. Must end with @{}.",
                self.orchestrator.settings().allowed_domain
            ),
            OtpError::Fetch(_) => {
                "Could not check the inbox right now. Please try again later.".to_owned()
            }
        }
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("admins", &self.admin_ids.len())
            .field("bot_username", &self.bot_username)
            .finish_non_exhaustive()
    }
}
