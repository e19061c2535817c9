//! Inbox fetcher module.
//!
//! Retrieves the disposable inbox page for an email address and pulls
//! the first plausible 6-digit OTP out of it.

mod client;
mod extract;

pub use client::{FetchError, HttpInboxFetcher, InboxFetcher};
pub use extract::{extract_first_otp, find_otp};
