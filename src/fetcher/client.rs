//! HTTP fetcher for the disposable inbox page.

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};

use super::extract::extract_first_otp;
use crate::config::FetchSettings;

/// User agent sent with every inbox request.
const USER_AGENT: &str = concat!("customer-otp-bot/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur while fetching the inbox page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Inbox request failed after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },

    #[error("Inbox returned HTTP {status} after {attempts} attempt(s)")]
    Status { status: u16, attempts: u32 },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    /// Returns true if retrying might have succeeded (network trouble,
    /// throttling, or a server-side failure).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => {
                StatusCode::from_u16(*status).is_ok_and(is_retryable_status)
            }
            Self::Client(_) => false,
        }
    }
}

/// Source of OTP codes for an email address.
#[async_trait]
pub trait InboxFetcher: Send + Sync {
    /// Fetches the inbox and returns the first code found, or `None`.
    async fn fetch(&self, email: &str) -> Result<Option<String>, FetchError>;
}

/// Statuses worth another attempt.
fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::FORBIDDEN
}

/// Fetches the inbox over HTTP with a bounded, fixed-backoff retry.
#[derive(Debug, Clone)]
pub struct HttpInboxFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl HttpInboxFetcher {
    /// Creates a fetcher from the given settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout())
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client, settings })
    }

    /// URL of the inbox page for an email address.
    #[must_use]
    pub fn inbox_url(&self, email: &str) -> String {
        format!(
            "{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            email.trim()
        )
    }

    /// Downloads the page body, retrying transient failures.
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let failure = match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    match response.text().await {
                        Ok(body) => return Ok(body),
                        Err(e) => FetchError::Transport {
                            attempts: attempt,
                            message: e.to_string(),
                        },
                    }
                }
                Ok(response) => {
                    let status = response.status();
                    if !is_retryable_status(status) {
                        return Err(FetchError::Status {
                            status: status.as_u16(),
                            attempts: attempt,
                        });
                    }
                    FetchError::Status {
                        status: status.as_u16(),
                        attempts: attempt,
                    }
                }
                Err(e) => FetchError::Transport {
                    attempts: attempt,
                    message: e.to_string(),
                },
            };

            if attempt >= max_attempts {
                warn!("Giving up on inbox fetch: {}", failure);
                return Err(failure);
            }

            debug!(
                "Inbox fetch attempt {}/{} failed ({}), retrying in {:?}",
                attempt,
                max_attempts,
                failure,
                self.settings.backoff()
            );
            tokio::time::sleep(self.settings.backoff()).await;
        }
    }
}

#[async_trait]
impl InboxFetcher for HttpInboxFetcher {
    async fn fetch(&self, email: &str) -> Result<Option<String>, FetchError> {
        let url = self.inbox_url(email);
        debug!("Fetching inbox page: {}", url);

        let html = self.fetch_page(&url).await?;
        let code = extract_first_otp(&html);
        debug!(
            "Scanned {} bytes of inbox HTML, code found: {}",
            html.len(),
            code.is_some()
        );
        Ok(code)
    }
}
