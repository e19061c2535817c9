//! Request orchestrator.
//!
//! Each OTP request walks a fixed sequence:
//! 1. Cooldown check: a gated user is turned away with the seconds left
//! 2. Quota check: a user at the limit is turned away
//! 3. Domain check: only addresses on the allowed domain pass
//! 4. Fixed delay, no early exit
//! 5. One inbox fetch
//! 6. Outcome:
//!    - code found → consume quota, remember the code, arm cooldown
//!    - no code → arm cooldown only
//!    - fetch error → touch nothing, count the error
//!
//! Steps 1-3 mutate nothing. Only completed fetches arm the cooldown and
//! only successful ones consume quota.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::activity::ActivityLog;
use super::email::validate_email;
use super::outcome::{Admission, OtpError, OtpOutcome};
use crate::config::BotConfig;
use crate::fetcher::{FetchError, InboxFetcher};
use crate::ledger::LedgerStore;

/// Capability invoked when too many fetches fail in a row.
pub trait Terminate: Send + Sync {
    fn terminate(&self, consecutive_errors: u32);
}

/// Exits the process so a supervisor can restart it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExit;

impl Terminate for ProcessExit {
    fn terminate(&self, consecutive_errors: u32) {
        error!(
            "{} consecutive inbox fetch errors, exiting for restart",
            consecutive_errors
        );
        std::process::exit(1);
    }
}

/// Policy knobs for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Lower-cased domain every requested address must use.
    pub allowed_domain: String,

    /// Successful fetches allowed per user.
    pub max_requests: u32,

    /// Wait before each fetch.
    pub delay: Duration,

    /// Cooldown armed after a completed fetch, in seconds.
    pub cooldown_secs: u64,

    /// Consecutive fetch errors that trigger termination (0 disables).
    pub error_exit_threshold: u32,
}

impl From<&BotConfig> for OrchestratorSettings {
    fn from(config: &BotConfig) -> Self {
        Self {
            allowed_domain: config.allowed_domain.clone(),
            max_requests: config.max_requests_per_user,
            delay: Duration::from_secs(config.delay_secs),
            cooldown_secs: config.cooldown_secs,
            error_exit_threshold: config.error_exit_threshold,
        }
    }
}

/// Runs OTP requests against the ledger and the inbox fetcher.
pub struct RequestOrchestrator {
    ledger: Arc<LedgerStore>,
    fetcher: Arc<dyn InboxFetcher>,
    settings: OrchestratorSettings,
    terminator: Arc<dyn Terminate>,
    consecutive_errors: AtomicU32,
    activity: ActivityLog,
}

impl RequestOrchestrator {
    /// Creates an orchestrator that exits the process on repeated fetch errors.
    #[must_use]
    pub fn new(
        ledger: Arc<LedgerStore>,
        fetcher: Arc<dyn InboxFetcher>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            ledger,
            fetcher,
            settings,
            terminator: Arc::new(ProcessExit),
            consecutive_errors: AtomicU32::new(0),
            activity: ActivityLog::default(),
        }
    }

    /// Replaces the termination capability.
    #[must_use]
    pub fn with_terminator(mut self, terminator: Arc<dyn Terminate>) -> Self {
        self.terminator = terminator;
        self
    }

    /// Runs the three gates without mutating anything.
    pub async fn admit(&self, user_id: u64, email: &str) -> Result<Admission, OtpError> {
        let result = self.check_gates(user_id, email).await;
        if let Err(e) = &result {
            debug!("Request from user {} rejected: {}", user_id, e);
            self.activity.record(user_id, email.trim(), e.label()).await;
        }
        result
    }

    async fn check_gates(&self, user_id: u64, email: &str) -> Result<Admission, OtpError> {
        let remaining_secs = self.ledger.remaining_cooldown(user_id).await;
        if remaining_secs > 0 {
            return Err(OtpError::CooldownActive { remaining_secs });
        }

        let used = self.ledger.usage(user_id).await;
        if used >= self.settings.max_requests {
            return Err(OtpError::QuotaExceeded {
                used,
                limit: self.settings.max_requests,
            });
        }

        let email = validate_email(email, &self.settings.allowed_domain)?;
        Ok(Admission::new(user_id, email))
    }

    /// Waits, fetches, and applies the outcome to the ledger.
    pub async fn complete(&self, admission: Admission) -> Result<OtpOutcome, OtpError> {
        let (user_id, email) = admission.into_parts();

        if !self.settings.delay.is_zero() {
            debug!("Waiting {:?} before checking {}", self.settings.delay, email);
            tokio::time::sleep(self.settings.delay).await;
        }

        let result = match self.fetcher.fetch(&email).await {
            Ok(Some(code)) => Ok(self.record_found(user_id, email.clone(), code).await),
            Ok(None) => {
                self.ledger
                    .set_cooldown(user_id, self.settings.cooldown_secs)
                    .await;
                self.consecutive_errors.store(0, Ordering::SeqCst);
                info!("No OTP yet for {} (user {})", email, user_id);
                Ok(OtpOutcome::NotFound {
                    email: email.clone(),
                })
            }
            Err(e) => {
                self.record_fetch_error(&e);
                Err(OtpError::Fetch(e))
            }
        };

        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(e) => e.label(),
        };
        self.activity.record(user_id, &email, label).await;

        result
    }

    /// Gates, waits, and fetches in one call.
    pub async fn request_otp(&self, user_id: u64, email: &str) -> Result<OtpOutcome, OtpError> {
        let admission = self.admit(user_id, email).await?;
        self.complete(admission).await
    }

    async fn record_found(&self, user_id: u64, email: String, code: String) -> OtpOutcome {
        let stale = self.ledger.last_code(&email).await.as_deref() == Some(code.as_str());

        let used = self.ledger.increment_usage(user_id).await;
        self.ledger.set_last_code(&email, &code).await;
        self.ledger
            .set_cooldown(user_id, self.settings.cooldown_secs)
            .await;
        self.consecutive_errors.store(0, Ordering::SeqCst);

        let remaining = self.settings.max_requests.saturating_sub(used);
        if stale {
            warn!("OTP for {} matches the previous one, it may be old", email);
        }
        info!(
            "Delivered OTP for {} to user {} ({}/{} used)",
            email, user_id, used, self.settings.max_requests
        );

        OtpOutcome::Found {
            email,
            code,
            remaining,
            stale,
        }
    }

    fn record_fetch_error(&self, err: &FetchError) {
        let errors = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(
            "Inbox fetch failed ({} in a row, transient: {}): {}",
            errors,
            err.is_transient(),
            err
        );

        let threshold = self.settings.error_exit_threshold;
        if threshold > 0 && errors >= threshold {
            self.terminator.terminate(errors);
        }
    }

    /// Fetch errors since the last completed fetch.
    #[must_use]
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<LedgerStore> {
        &self.ledger
    }

    #[must_use]
    pub const fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    #[must_use]
    pub const fn activity(&self) -> &ActivityLog {
        &self.activity
    }
}

impl std::fmt::Debug for RequestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOrchestrator")
            .field("settings", &self.settings)
            .field("consecutive_errors", &self.consecutive_errors())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::orchestrator::EmailError;

    /// Fetcher that replays scripted results and counts calls.
    #[derive(Default)]
    pub(crate) struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<Option<String>, FetchError>>>,
        pub(crate) calls: AtomicU32,
    }

    impl ScriptedFetcher {
        pub(crate) fn new(script: Vec<Result<Option<String>, FetchError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl InboxFetcher for ScriptedFetcher {
        async fn fetch(&self, _email: &str) -> Result<Option<String>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().await.pop_front().unwrap_or(Ok(None))
        }
    }

    /// Records termination requests instead of exiting.
    #[derive(Default)]
    pub(crate) struct RecordingTerminator {
        pub(crate) calls: AtomicU32,
    }

    impl Terminate for RecordingTerminator {
        fn terminate(&self, _consecutive_errors: u32) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn settings(max_requests: u32) -> OrchestratorSettings {
        OrchestratorSettings {
            allowed_domain: "allowed.com".to_owned(),
            max_requests,
            delay: Duration::ZERO,
            cooldown_secs: 120,
            error_exit_threshold: 3,
        }
    }

    pub(crate) fn transient() -> FetchError {
        FetchError::Transport {
            attempts: 3,
            message: "connection reset".to_owned(),
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        ledger: Arc<LedgerStore>,
        fetcher: Arc<ScriptedFetcher>,
        terminator: Arc<RecordingTerminator>,
        orchestrator: RequestOrchestrator,
    }

    fn harness(
        settings: OrchestratorSettings,
        script: Vec<Result<Option<String>, FetchError>>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(LedgerStore::open(dir.path().join("state.json")));
        let fetcher = Arc::new(ScriptedFetcher::new(script));
        let terminator = Arc::new(RecordingTerminator::default());
        let orchestrator = RequestOrchestrator::new(
            Arc::clone(&ledger),
            Arc::clone(&fetcher) as Arc<dyn InboxFetcher>,
            settings,
        )
        .with_terminator(Arc::clone(&terminator) as Arc<dyn Terminate>);

        Harness {
            _dir: dir,
            ledger,
            fetcher,
            terminator,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn test_success_consumes_quota_and_arms_cooldown() {
        let h = harness(settings(1), vec![Ok(Some("123456".to_owned()))]);

        let outcome = h.orchestrator.request_otp(1, "alice@allowed.com").await.unwrap();
        assert_eq!(
            outcome,
            OtpOutcome::Found {
                email: "alice@allowed.com".to_owned(),
                code: "123456".to_owned(),
                remaining: 0,
                stale: false,
            }
        );
        assert_eq!(h.ledger.usage(1).await, 1);
        assert_eq!(h.ledger.last_code("alice@allowed.com").await.as_deref(), Some("123456"));
        assert!(h.ledger.remaining_cooldown(1).await > 0);
    }

    #[tokio::test]
    async fn test_second_request_hits_quota_without_mutation() {
        let h = harness(settings(1), vec![Ok(Some("123456".to_owned()))]);
        h.orchestrator.request_otp(1, "alice@allowed.com").await.unwrap();

        // Clear the cooldown so the request reaches the quota gate.
        h.ledger.set_cooldown(1, 0).await;
        let before = h.ledger.snapshot().await;

        let err = h.orchestrator.request_otp(1, "alice@allowed.com").await.unwrap_err();
        assert!(matches!(err, OtpError::QuotaExceeded { used: 1, limit: 1 }));
        assert_eq!(h.ledger.snapshot().await, before);
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_immediate_repeat_is_gated_by_cooldown() {
        let h = harness(settings(5), vec![Ok(Some("123456".to_owned()))]);
        h.orchestrator.request_otp(1, "alice@allowed.com").await.unwrap();

        let err = h.orchestrator.request_otp(1, "alice@allowed.com").await.unwrap_err();
        assert!(matches!(err, OtpError::CooldownActive { remaining_secs } if remaining_secs > 0));
        assert_eq!(h.ledger.usage(1).await, 1);
    }

    #[tokio::test]
    async fn test_not_found_arms_cooldown_only() {
        let h = harness(settings(3), vec![Ok(None)]);

        let outcome = h.orchestrator.request_otp(2, "bob@allowed.com").await.unwrap();
        assert_eq!(
            outcome,
            OtpOutcome::NotFound {
                email: "bob@allowed.com".to_owned()
            }
        );
        assert_eq!(h.ledger.usage(2).await, 0);
        assert!(h.ledger.remaining_cooldown(2).await > 0);
        assert!(h.ledger.last_code("bob@allowed.com").await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_error_changes_nothing_but_the_counter() {
        let h = harness(settings(3), vec![Err(transient())]);

        let err = h.orchestrator.request_otp(3, "carol@allowed.com").await.unwrap_err();
        assert!(matches!(err, OtpError::Fetch(_)));
        assert_eq!(h.ledger.usage(3).await, 0);
        assert_eq!(h.ledger.remaining_cooldown(3).await, 0);
        assert_eq!(h.orchestrator.consecutive_errors(), 1);
        assert_eq!(h.terminator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_threshold_terminates_and_success_resets() {
        let h = harness(
            settings(10),
            vec![
                Err(transient()),
                Err(transient()),
                Ok(None),
                Err(transient()),
                Err(transient()),
                Err(transient()),
            ],
        );

        for _ in 0..2 {
            assert!(h.orchestrator.request_otp(4, "d@allowed.com").await.is_err());
        }
        assert_eq!(h.orchestrator.consecutive_errors(), 2);

        h.orchestrator.request_otp(4, "d@allowed.com").await.unwrap();
        assert_eq!(h.orchestrator.consecutive_errors(), 0);
        h.ledger.set_cooldown(4, 0).await;

        for _ in 0..3 {
            assert!(h.orchestrator.request_otp(4, "d@allowed.com").await.is_err());
        }
        assert_eq!(h.orchestrator.consecutive_errors(), 3);
        assert_eq!(h.terminator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_usage_counts_only_successes() {
        let h = harness(
            settings(10),
            vec![
                Ok(Some("111111".to_owned())),
                Ok(None),
                Err(transient()),
                Ok(Some("222222".to_owned())),
                Ok(None),
                Ok(Some("333333".to_owned())),
            ],
        );

        for _ in 0..6 {
            let _ = h.orchestrator.request_otp(5, "e@allowed.com").await;
            h.ledger.set_cooldown(5, 0).await;
        }
        assert_eq!(h.ledger.usage(5).await, 3);
    }

    #[tokio::test]
    async fn test_repeated_code_is_flagged_stale() {
        let h = harness(
            settings(10),
            vec![Ok(Some("999000".to_owned())), Ok(Some("999000".to_owned()))],
        );

        h.orchestrator.request_otp(6, "f@allowed.com").await.unwrap();
        h.ledger.set_cooldown(6, 0).await;
        let outcome = h.orchestrator.request_otp(6, "F@Allowed.com").await.unwrap();

        assert!(matches!(outcome, OtpOutcome::Found { stale: true, remaining: 8, .. }));
        assert_eq!(h.ledger.usage(6).await, 2);
    }

    #[tokio::test]
    async fn test_invalid_domain_is_rejected_before_fetching() {
        let h = harness(settings(10), vec![Ok(Some("123456".to_owned()))]);

        let err = h.orchestrator.request_otp(7, "user@other.com").await.unwrap_err();
        assert!(matches!(err, OtpError::InvalidEmail(EmailError::WrongDomain { .. })));

        let err = h.orchestrator.request_otp(7, "@allowed.com").await.unwrap_err();
        assert!(matches!(err, OtpError::InvalidEmail(EmailError::EmptyLocalPart)));

        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.ledger.snapshot().await, crate::ledger::Ledger::default());
    }

    #[tokio::test]
    async fn test_admit_returns_validated_request_without_mutation() {
        let h = harness(settings(10), vec![]);

        let admission = h.orchestrator.admit(11, "  Jo@Allowed.com ").await.unwrap();
        assert_eq!(admission.user_id(), 11);
        assert_eq!(admission.email(), "Jo@Allowed.com");
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.ledger.snapshot().await, crate::ledger::Ledger::default());
    }

    #[tokio::test]
    async fn test_cooldown_is_checked_before_quota() {
        let h = harness(settings(0), vec![]);
        h.ledger.set_cooldown(8, 60).await;

        let err = h.orchestrator.request_otp(8, "g@allowed.com").await.unwrap_err();
        assert!(matches!(err, OtpError::CooldownActive { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_precedes_fetch() {
        let mut config = settings(10);
        config.delay = Duration::from_secs(30);
        let h = harness(config, vec![Ok(None)]);

        let started = tokio::time::Instant::now();
        h.orchestrator.request_otp(9, "h@allowed.com").await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_activity_log_records_every_outcome() {
        let h = harness(settings(10), vec![Ok(Some("123456".to_owned()))]);
        h.orchestrator.request_otp(10, "i@allowed.com").await.unwrap();
        let _ = h.orchestrator.request_otp(10, "i@allowed.com").await;

        let labels: Vec<&str> = h
            .orchestrator
            .activity()
            .recent(10)
            .await
            .iter()
            .map(|e| e.outcome)
            .collect();
        assert_eq!(labels, vec!["found", "cooldown"]);
    }
}
