//! Results of an OTP request.

use thiserror::Error;

use super::email::EmailError;
use crate::fetcher::FetchError;

/// A request that passed every gate and is ready to fetch.
///
/// Only [`RequestOrchestrator::admit`](super::RequestOrchestrator::admit)
/// creates one, so holding an `Admission` means the gates were checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    user_id: u64,
    email: String,
}

impl Admission {
    pub(super) const fn new(user_id: u64, email: String) -> Self {
        Self { user_id, email }
    }

    /// The requesting user.
    #[must_use]
    pub const fn user_id(&self) -> u64 {
        self.user_id
    }

    /// The validated, trimmed address.
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    pub(super) fn into_parts(self) -> (u64, String) {
        (self.user_id, self.email)
    }
}

/// Outcome of a completed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpOutcome {
    /// A code was found. Quota consumed, cooldown armed.
    Found {
        email: String,
        code: String,
        /// Requests the user has left after this one.
        remaining: u32,
        /// The code equals the last one delivered for this email.
        stale: bool,
    },

    /// The inbox was fetched but held no code. Cooldown armed, quota untouched.
    NotFound { email: String },
}

/// Reasons an OTP request did not produce an outcome.
#[derive(Debug, Error)]
pub enum OtpError {
    #[error("Please wait {remaining_secs} seconds before the next request")]
    CooldownActive { remaining_secs: u64 },

    #[error("Limit reached: {used}/{limit} requests used")]
    QuotaExceeded { used: u32, limit: u32 },

    #[error("Invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    #[error("Inbox fetch failed: {0}")]
    Fetch(#[from] FetchError),
}

impl OtpError {
    /// Short label for the activity log.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::CooldownActive { .. } => "cooldown",
            Self::QuotaExceeded { .. } => "quota",
            Self::InvalidEmail(_) => "invalid-email",
            Self::Fetch(_) => "fetch-error",
        }
    }
}

impl OtpOutcome {
    /// Short label for the activity log.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Found { stale: false, .. } => "found",
            Self::Found { stale: true, .. } => "found-stale",
            Self::NotFound { .. } => "not-found",
        }
    }
}
