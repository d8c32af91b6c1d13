//! Retry policy for network requests
//!
//! Every attempt is classified into an [`AttemptOutcome`]; the policy then
//! decides, without doing any I/O, whether and when to try again.

use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;

/// Why an attempt may be worth repeating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx
    ServerError(u16),
    /// HTTP 403; the next attempt should use a different identity
    Blocked,
    /// Timeout, refused connection or truncated body
    Network(String),
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate limited (HTTP 429)"),
            Self::ServerError(status) => write!(f, "server error (HTTP {})", status),
            Self::Blocked => write!(f, "blocked (HTTP 403)"),
            Self::Network(e) => write!(f, "network error: {}", e),
        }
    }
}

/// Classified result of one attempt
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    Retryable(RetryReason),
    Fatal(String),
}

/// Classifies an HTTP status
///
/// | Status | Outcome |
/// |--------|---------|
/// | 200 | Success |
/// | 429 | Retryable, rate limited |
/// | 5xx | Retryable, server error |
/// | 403 | Retryable, blocked |
/// | anything else | Fatal |
pub fn classify_status(status: StatusCode) -> AttemptOutcome<()> {
    match status {
        StatusCode::OK => AttemptOutcome::Success(()),
        StatusCode::TOO_MANY_REQUESTS => AttemptOutcome::Retryable(RetryReason::RateLimited),
        StatusCode::FORBIDDEN => AttemptOutcome::Retryable(RetryReason::Blocked),
        s if s.is_server_error() => AttemptOutcome::Retryable(RetryReason::ServerError(s.as_u16())),
        s => AttemptOutcome::Fatal(format!("HTTP {}", s)),
    }
}

/// Classifies a transport error
pub fn classify_error<T>(error: &reqwest::Error) -> AttemptOutcome<T> {
    if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        AttemptOutcome::Retryable(RetryReason::Network(error.to_string()))
    } else {
        AttemptOutcome::Fatal(error.to_string())
    }
}

/// What to do after a retryable attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter {
        delay: Duration,
        rotate_identity: bool,
    },
    GiveUp,
}

/// Bounded exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration, max_jitter: Duration) -> Self {
        Self {
            max_attempts,
            backoff_base,
            max_jitter,
        }
    }

    /// Delay before the attempt following `attempt` (zero-based)
    ///
    /// `base * 2^attempt + jitter_fraction * max_jitter`, where
    /// `jitter_fraction` is clamped to `[0, 1]`.
    pub fn backoff_delay(&self, attempt: u32, jitter_fraction: f64) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let jitter = self.max_jitter.mul_f64(jitter_fraction.clamp(0.0, 1.0));
        self.backoff_base.saturating_mul(factor) + jitter
    }

    /// Decides what follows a retryable failure of `attempt` (zero-based)
    pub fn decide(&self, attempt: u32, reason: &RetryReason, jitter_fraction: f64) -> RetryDecision {
        if attempt + 1 >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        RetryDecision::RetryAfter {
            delay: self.backoff_delay(attempt, jitter_fraction),
            rotate_identity: matches!(reason, RetryReason::Blocked),
        }
    }
}
