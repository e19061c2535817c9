//! Bounded in-memory log of recent OTP requests, shown by the admin `log` command.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// Entries kept when no capacity is given.
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 50;

/// One recorded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub user_id: u64,
    pub email: String,
    pub outcome: &'static str,
}

impl fmt::Display for ActivityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} user={} email={} -> {}",
            self.at.format("%Y-%m-%d %H:%M:%S"),
            self.user_id,
            self.email,
            self.outcome
        )
    }
}

/// Ring buffer of the most recent requests.
#[derive(Debug)]
pub struct ActivityLog {
    capacity: usize,
    entries: Mutex<VecDeque<ActivityEntry>>,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_CAPACITY)
    }
}

impl ActivityLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Appends an entry, dropping the oldest one when full.
    pub async fn record(&self, user_id: u64, email: &str, outcome: &'static str) {
        let mut entries = self.entries.lock().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(ActivityEntry {
            at: Utc::now(),
            user_id,
            email: email.to_owned(),
            outcome,
        });
    }

    /// Up to `limit` most recent entries, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
        let entries = self.entries.lock().await;
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keeps_most_recent_entries() {
        let log = ActivityLog::new(3);
        for user in 1..=5 {
            log.record(user, "a@yotomail.com", "found").await;
        }

        let users: Vec<u64> = log.recent(10).await.iter().map(|e| e.user_id).collect();
        assert_eq!(users, vec![3, 4, 5]);

        let users: Vec<u64> = log.recent(2).await.iter().map(|e| e.user_id).collect();
        assert_eq!(users, vec![4, 5]);
    }

    #[tokio::test]
    async fn test_entry_display() {
        let log = ActivityLog::default();
        log.record(42, "bob@yotomail.com", "not-found").await;
        let line = log.recent(1).await[0].to_string();
        assert!(line.ends_with("user=42 email=bob@yotomail.com -> not-found"));
    }
}
