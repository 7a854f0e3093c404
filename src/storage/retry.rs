//! Retry policy for lock contention on engine-owned transactions

use rand::Rng;
use rusqlite::ErrorCode;
use std::time::Duration;

/// Bounded exponential backoff with up to 25% jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retry at all (only ever applies when the engine owns the transaction)
    pub enabled: bool,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 5,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Undelayed delay for a 1-indexed attempt: `base_delay * 2^(attempt-1)`
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }

    /// Delay before replaying after the given failed attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..0.25);
        self.base_backoff(attempt).mul_f64(1.0 + jitter)
    }

    /// Whether another attempt is allowed after `attempt` failed with `err`
    pub fn should_retry(&self, attempt: u32, err: &rusqlite::Error) -> bool {
        self.enabled && attempt <= self.max_retries && is_transient(err)
    }
}

/// SQLite's equivalents of deadlock / lock-wait-timeout.
pub fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}
