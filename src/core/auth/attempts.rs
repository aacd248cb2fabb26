//! Login attempt auditing and throttling
//!
//! Every login attempt, successful or not, produces one append-only record.
//! Recording happens on a spawned task so a slow or failing audit store never
//! holds up or fails the login itself.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::task::JoinHandle;

use crate::core::db::models::CreateLoginAttempt;
use crate::core::db::repositories::LoginAttemptStore;

/// Why a login attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    InvalidEmail,
    InvalidPassword,
    AccountInactive,
    TooManyAttempts,
    /// Login aborted by a storage or signing failure
    Internal,
}

impl FailReason {
    /// Reason code stored on the audit record
    pub fn as_str(&self) -> &'static str {
        match self {
            FailReason::InvalidEmail => "Invalid email",
            FailReason::InvalidPassword => "Invalid password",
            FailReason::AccountInactive => "Account inactive",
            FailReason::TooManyAttempts => "Too many attempts",
            FailReason::Internal => "Internal error",
        }
    }
}

impl std::fmt::Display for FailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire-and-forget writer of login audit records
#[derive(Clone)]
pub struct LoginAttemptRecorder {
    store: Arc<dyn LoginAttemptStore>,
}

impl LoginAttemptRecorder {
    pub fn new(store: Arc<dyn LoginAttemptStore>) -> Self {
        Self { store }
    }

    /// Record a successful login
    pub fn record_success(&self, email: &str, ip_address: Option<String>) -> JoinHandle<()> {
        self.record(email, ip_address, None)
    }

    /// Record a failed login with its reason
    pub fn record_failure(
        &self,
        email: &str,
        ip_address: Option<String>,
        reason: FailReason,
    ) -> JoinHandle<()> {
        self.record(email, ip_address, Some(reason))
    }

    /// Append one audit record in the background.
    ///
    /// The returned handle only exists so callers (mostly tests) can wait for
    /// the write; errors are logged, never returned.
    pub fn record(
        &self,
        email: &str,
        ip_address: Option<String>,
        reason: Option<FailReason>,
    ) -> JoinHandle<()> {
        let attempt = CreateLoginAttempt {
            email: email.to_string(),
            ip_address,
            successful: reason.is_none(),
            fail_reason: reason.map(|r| r.as_str().to_string()),
        };
        let store = self.store.clone();

        tokio::spawn(async move {
            if let Err(e) = store.create(&attempt).await {
                tracing::error!(
                    email = %attempt.email,
                    successful = attempt.successful,
                    error = %e,
                    "Failed to record login attempt"
                );
            }
        })
    }
}

/// Caps failed logins per email inside a sliding window
#[derive(Clone)]
pub struct LoginThrottle {
    store: Arc<dyn LoginAttemptStore>,
    max_attempts: u32,
    window: Duration,
}

impl LoginThrottle {
    /// `max_attempts == 0` disables throttling
    pub fn new(store: Arc<dyn LoginAttemptStore>, max_attempts: u32, window_minutes: i64) -> Self {
        Self {
            store,
            max_attempts,
            window: Duration::minutes(window_minutes),
        }
    }

    pub fn with_limits(mut self, max_attempts: u32, window_minutes: i64) -> Self {
        self.max_attempts = max_attempts;
        self.window = Duration::minutes(window_minutes);
        self
    }

    /// Whether further login attempts for `email` must be refused right now.
    ///
    /// A failing count query lets the attempt through.
    pub async fn is_throttled(&self, email: &str) -> bool {
        if self.max_attempts == 0 {
            return false;
        }

        let since = Utc::now() - self.window;
        match self.store.count_failures_since(email, since).await {
            Ok(failures) => failures >= i64::from(self.max_attempts),
            Err(e) => {
                tracing::error!(email = %email, error = %e, "Failed to count login attempts");
                false
            }
        }
    }
}
