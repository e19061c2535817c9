//! Single-owner ledger store.
//!
//! Every mutation runs under one lock and rewrites the whole backing file
//! before the lock is released, so concurrent handlers never interleave
//! their read-modify-write cycles.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::records::{CooldownRecord, LastCodeRecord, Ledger};

/// Normalizes an email address for use as a ledger key.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Ledger store backed by a single JSON file.
#[derive(Debug)]
pub struct LedgerStore {
    /// Path of the backing file.
    path: PathBuf,

    /// In-memory ledger, the source of truth while the process runs.
    ledger: Mutex<Ledger>,
}

impl LedgerStore {
    /// Opens the store, loading whatever the backing file currently holds.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ledger = Ledger::load(&path);
        debug!(
            "Loaded ledger from {} ({} users, {} cached codes, {} cooldowns)",
            path.display(),
            ledger.usage.len(),
            ledger.last_codes.len(),
            ledger.cooldowns.len()
        );
        Self {
            path,
            ledger: Mutex::new(ledger),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of successful fetches recorded for the user.
    pub async fn usage(&self, user_id: u64) -> u32 {
        self.ledger
            .lock()
            .await
            .usage
            .get(&user_id)
            .map_or(0, |r| r.count)
    }

    /// Adds one to the user's count and returns the new value.
    pub async fn increment_usage(&self, user_id: u64) -> u32 {
        let mut ledger = self.ledger.lock().await;
        let record = ledger.usage.entry(user_id).or_default();
        record.count = record.count.saturating_add(1);
        let count = record.count;
        self.persist(&ledger);
        count
    }

    /// Sets the user's count back to zero.
    pub async fn reset_usage(&self, user_id: u64) {
        let mut ledger = self.ledger.lock().await;
        ledger.usage.entry(user_id).or_default().count = 0;
        self.persist(&ledger);
    }

    /// Last code delivered for the email, if any.
    pub async fn last_code(&self, email: &str) -> Option<String> {
        self.ledger
            .lock()
            .await
            .last_codes
            .get(&normalize_email(email))
            .map(|r| r.code.clone())
    }

    /// Records `code` as the latest one seen for the email.
    pub async fn set_last_code(&self, email: &str, code: &str) {
        let mut ledger = self.ledger.lock().await;
        ledger.last_codes.insert(
            normalize_email(email),
            LastCodeRecord {
                code: code.to_owned(),
                observed_at: Utc::now(),
            },
        );
        self.persist(&ledger);
    }

    /// Forgets the last code for the email. Returns whether anything was removed.
    pub async fn clear_last_code(&self, email: &str) -> bool {
        let mut ledger = self.ledger.lock().await;
        let removed = ledger.last_codes.remove(&normalize_email(email)).is_some();
        if removed {
            self.persist(&ledger);
        }
        removed
    }

    /// Gates the user for the next `seconds` seconds.
    pub async fn set_cooldown(&self, user_id: u64, seconds: u64) {
        let next_allowed_at = Utc::now()
            .timestamp()
            .saturating_add(i64::try_from(seconds).unwrap_or(i64::MAX));
        let mut ledger = self.ledger.lock().await;
        ledger
            .cooldowns
            .insert(user_id, CooldownRecord { next_allowed_at });
        self.persist(&ledger);
    }

    /// Seconds until the user may start another request (0 if not gated).
    pub async fn remaining_cooldown(&self, user_id: u64) -> u64 {
        self.remaining_cooldown_at(user_id, Utc::now()).await
    }

    /// Same as [`Self::remaining_cooldown`], measured from `now`.
    pub async fn remaining_cooldown_at(&self, user_id: u64, now: DateTime<Utc>) -> u64 {
        let ledger = self.ledger.lock().await;
        ledger.cooldowns.get(&user_id).map_or(0, |c| {
            u64::try_from(c.next_allowed_at.saturating_sub(now.timestamp())).unwrap_or(0)
        })
    }

    /// Copy of the current ledger.
    pub async fn snapshot(&self) -> Ledger {
        self.ledger.lock().await.clone()
    }

    /// Rewrites the backing file. Failures are logged and otherwise ignored.
    fn persist(&self, ledger: &Ledger) {
        if let Err(e) = ledger.save(&self.path) {
            warn!("Failed to save ledger to {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn temp_store() -> (tempfile::TempDir, LedgerStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::open(dir.path().join("state.json"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_usage_defaults_and_increments() {
        let (_dir, store) = temp_store();
        assert_eq!(store.usage(1).await, 0);
        assert_eq!(store.increment_usage(1).await, 1);
        assert_eq!(store.increment_usage(1).await, 2);
        assert_eq!(store.usage(1).await, 2);
        assert_eq!(store.usage(2).await, 0);
    }

    #[tokio::test]
    async fn test_reset_usage() {
        let (_dir, store) = temp_store();
        for _ in 0..5 {
            store.increment_usage(9).await;
        }
        store.reset_usage(9).await;
        assert_eq!(store.usage(9).await, 0);

        store.reset_usage(10).await;
        assert_eq!(store.usage(10).await, 0);
    }

    #[tokio::test]
    async fn test_last_code_set_and_clear() {
        let (_dir, store) = temp_store();
        assert!(store.last_code("a@yotomail.com").await.is_none());

        store.set_last_code("A@Yotomail.com ", "123456").await;
        assert_eq!(store.last_code("a@yotomail.com").await.as_deref(), Some("123456"));

        assert!(store.clear_last_code("a@yotomail.com").await);
        assert!(store.last_code("a@yotomail.com").await.is_none());
        assert!(!store.clear_last_code("a@yotomail.com").await);
    }

    #[tokio::test]
    async fn test_cooldown_window() {
        let (_dir, store) = temp_store();
        assert_eq!(store.remaining_cooldown(3).await, 0);

        store.set_cooldown(3, 120).await;
        let remaining = store.remaining_cooldown(3).await;
        assert!(remaining > 0 && remaining <= 120, "remaining = {remaining}");

        let later = Utc::now() + TimeDelta::seconds(121);
        assert_eq!(store.remaining_cooldown_at(3, later).await, 0);
    }

    #[tokio::test]
    async fn test_zero_cooldown_does_not_gate() {
        let (_dir, store) = temp_store();
        store.set_cooldown(4, 0).await;
        assert_eq!(store.remaining_cooldown(4).await, 0);
    }

    #[tokio::test]
    async fn test_mutations_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = LedgerStore::open(&path);
        store.increment_usage(11).await;
        store.set_last_code("x@yotomail.com", "222333").await;
        store.set_cooldown(11, 600).await;
        drop(store);

        let reopened = LedgerStore::open(&path);
        assert_eq!(reopened.usage(11).await, 1);
        assert_eq!(reopened.last_code("x@yotomail.com").await.as_deref(), Some("222333"));
        assert!(reopened.remaining_cooldown(11).await > 0);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::open(dir.path().join("no-such-dir").join("state.json"));

        assert_eq!(store.increment_usage(5).await, 1);
        assert_eq!(store.usage(5).await, 1);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = std::sync::Arc::new(LedgerStore::open(&path));

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move { store.increment_usage(i % 2).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.usage(0).await, 10);
        assert_eq!(store.usage(1).await, 10);
        assert_eq!(Ledger::load(&path).usage[&0].count, 10);
    }
}
