//! Quota, cooldown, and last-code ledger.
//!
//! The ledger is a small JSON document reloaded once at startup and
//! rewritten in full on every mutation.

mod records;
mod store;

pub use records::{CooldownRecord, LastCodeRecord, Ledger, LedgerError, UsageRecord};
pub use store::{LedgerStore, normalize_email};
