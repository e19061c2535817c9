//! Command types and definitions.

use std::fmt;

use crate::orchestrator::Admission;

/// Available bot commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// Show usage information.
    Start,

    /// Fetch the OTP for an email address.
    Otp(Option<String>),

    /// Show the caller's remaining quota.
    Remaining,

    /// Reset a user's quota (admin).
    ResetLimit(Option<String>),

    /// Forget the last code seen for an email (admin).
    ClearEmail(Option<String>),

    /// Show recent requests (admin).
    Log,
}

impl BotCommand {
    /// Parses a command from a message text.
    ///
    /// Accepts `/command`, `/command@botname`, and a trailing argument.
    /// Returns `None` if the message is not a known command or is addressed
    /// to a bot other than `bot_username`.
    #[must_use]
    pub fn parse(text: &str, bot_username: &str) -> Option<Self> {
        let text = text.trim();
        let after_slash = text.strip_prefix('/')?;

        let (head, args) = match after_slash.split_once(char::is_whitespace) {
            Some((head, args)) => (head, Some(args.trim())),
            None => (after_slash, None),
        };
        let cmd = match head.split_once('@') {
            Some((cmd, bot)) if bot.eq_ignore_ascii_case(bot_username) => cmd,
            Some(_) => return None,
            None => head,
        }
        .to_lowercase();
        let first_arg = args
            .and_then(|a| a.split_whitespace().next())
            .map(str::to_owned);

        match cmd.as_str() {
            "start" | "help" => Some(Self::Start),
            "otp" | "code" => Some(Self::Otp(first_arg)),
            "remaining" | "left" => Some(Self::Remaining),
            "resetlimit" => Some(Self::ResetLimit(first_arg)),
            "clearemail" => Some(Self::ClearEmail(first_arg)),
            "log" | "logs" => Some(Self::Log),
            _ => None,
        }
    }

    /// Returns the command name as it appears in help.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Otp(_) => "otp",
            Self::Remaining => "remaining",
            Self::ResetLimit(_) => "resetlimit",
            Self::ClearEmail(_) => "clearemail",
            Self::Log => "log",
        }
    }

    /// Whether only admins may run this command.
    #[must_use]
    pub const fn is_admin_only(&self) -> bool {
        matches!(self, Self::ResetLimit(_) | Self::ClearEmail(_) | Self::Log)
    }
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Otp(Some(arg)) | Self::ResetLimit(Some(arg)) | Self::ClearEmail(Some(arg)) => {
                write!(f, "/{} {arg}", self.name())
            }
            _ => write!(f, "/{}", self.name()),
        }
    }
}

/// Result of command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Whether the command was successful.
    pub success: bool,

    /// Response message to show the user.
    pub message: String,

    /// Admitted OTP request to finish after the message is sent.
    pub pending: Option<Admission>,
}

impl CommandResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            pending: None,
        }
    }

    /// Creates a successful result with an OTP request still to complete.
    #[must_use]
    pub fn success_with_pending(message: impl Into<String>, admission: Admission) -> Self {
        Self {
            success: true,
            message: message.into(),
            pending: Some(admission),
        }
    }

    /// Creates an error result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            pending: None,
        }
    }
}
