//! OTP request orchestration.
//!
//! Gates each request on cooldown, quota, and email domain, waits a fixed
//! delay, fetches the inbox, and records the outcome in the ledger.

mod activity;
mod email;
mod outcome;
mod runner;

pub use activity::{ActivityEntry, ActivityLog, DEFAULT_ACTIVITY_CAPACITY};
pub use email::{EmailError, validate_email};
pub use outcome::{Admission, OtpError, OtpOutcome};
pub use runner::{OrchestratorSettings, ProcessExit, RequestOrchestrator, Terminate};

#[cfg(test)]
pub(crate) use runner::tests as test_support;
