//! Retry decisions and backoff delays

use crate::types::TxRecord;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fraction of the computed delay added as random jitter
const JITTER_FACTOR: f64 = 0.1;

/// Errors that retrying cannot fix. Checked first.
const PERMANENT_PATTERNS: &[&str] = &[
    "user rejected",
    "user denied",
    "rejected",
    "denied",
    "insufficient funds",
    "insufficient balance",
    "execution reverted",
    "revert",
];

/// Errors expected to clear up on their own
const TRANSIENT_PATTERNS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection",
    "econnreset",
    "rate limit",
    "too many requests",
    "429",
    "nonce too low",
    "already known",
    "nonce has already been used",
    "replacement transaction underpriced",
    "underpriced",
    "gas price too low",
    "is pending",
    "still pending",
    "queued",
];

/// Backoff strategy between attempts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// base × multiplier^(attempt−1), plus jitter
    #[default]
    ExponentialBackoff,
    /// base × attempt
    Linear,
    /// Always base
    Fixed,
    /// Retry immediately
    None,
}

/// Outcome of classifying an error message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Will not succeed on retry
    Permanent,
    /// Worth retrying
    Transient,
    /// Unrecognized, treated as not retryable
    Unknown,
}

impl ErrorClass {
    /// Whether this class allows a retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// Classify an error by its message text
pub fn classify(error: &str) -> ErrorClass {
    let lower = error.to_lowercase();
    if PERMANENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        ErrorClass::Permanent
    } else if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Unknown
    }
}

/// Whether the error concerns the nonce and the tracked value is stale
pub fn is_nonce_error(error: &str) -> bool {
    error.to_lowercase().contains("nonce")
}

/// Retry policy: decision plus delay
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    strategy: RetryStrategy,
    base_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryStrategy::ExponentialBackoff, 1000, 30_000, 2.0)
    }
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(strategy: RetryStrategy, base_delay_ms: u64, max_delay_ms: u64, multiplier: f64) -> Self {
        Self {
            strategy,
            base_delay_ms,
            max_delay_ms,
            multiplier,
        }
    }

    /// Strategy in use
    pub fn strategy(&self) -> RetryStrategy {
        self.strategy
    }

    /// Whether `record` should be retried after `error`
    ///
    /// False once the record has used up its retries, whatever the error.
    pub fn should_retry(&self, record: &TxRecord, error: &str) -> bool {
        if record.retry_count >= record.max_retries {
            return false;
        }
        classify(error).is_retryable()
    }

    /// Delay before retry number `attempt` (1-based), with random jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, rand::random::<f64>())
    }

    /// Delay before retry number `attempt`
    ///
    /// `jitter` in `[0, 1]` picks how much of the 10% jitter band is added;
    /// only the exponential strategy applies it.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let attempt = attempt.max(1);
        let base = self.base_delay_ms as f64;

        let raw = match self.strategy {
            RetryStrategy::ExponentialBackoff => {
                let exp = base * self.multiplier.powi(attempt as i32 - 1);
                exp + exp * JITTER_FACTOR * jitter.clamp(0.0, 1.0)
            }
            RetryStrategy::Linear => base * attempt as f64,
            RetryStrategy::Fixed => base,
            RetryStrategy::None => 0.0,
        };

        let ms = if raw.is_finite() {
            (raw.floor() as u64).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };
        Duration::from_millis(ms)
    }
}
