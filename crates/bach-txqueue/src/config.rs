//! Executor configuration

use crate::error::{TxQueueError, TxQueueResult};
use crate::retry::{RetryPolicy, RetryStrategy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Executor and queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum records executing or confirming at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Retry ceiling for records enqueued without one
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Backoff strategy
    #[serde(default)]
    pub retry_strategy: RetryStrategy,
    /// Base retry delay
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Retry delay cap
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    /// Exponential backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Blocks required on top of the inclusion block
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Give up waiting for a receipt after this long
    #[serde(default)]
    pub confirmation_timeout_ms: Option<u64>,
    /// Fallback wake-up interval of the run loop
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Start the executor when the manager is built
    #[serde(default = "default_true")]
    pub auto_start: bool,
    /// Assign nonces locally
    #[serde(default = "default_true")]
    pub auto_nonce: bool,
    /// Log transitions at info level
    #[serde(default)]
    pub debug: bool,
}

fn default_max_concurrent() -> usize {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_confirmations() -> u64 {
    1
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            default_max_retries: default_max_retries(),
            retry_strategy: RetryStrategy::default(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            confirmations: default_confirmations(),
            confirmation_timeout_ms: None,
            poll_interval_ms: default_poll_interval_ms(),
            auto_start: true,
            auto_nonce: true,
            debug: false,
        }
    }
}

impl ExecutorConfig {
    /// Reject values the executor cannot run with
    pub fn validate(&self) -> TxQueueResult<()> {
        if self.max_concurrent == 0 {
            return Err(TxQueueError::InvalidConfig("max_concurrent must be at least 1".into()));
        }
        if self.confirmations == 0 {
            return Err(TxQueueError::InvalidConfig("confirmations must be at least 1".into()));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier <= 0.0 {
            return Err(TxQueueError::InvalidConfig("backoff_multiplier must be positive".into()));
        }
        if self.max_retry_delay_ms < self.retry_delay_ms {
            return Err(TxQueueError::InvalidConfig(format!(
                "max_retry_delay_ms ({}) is below retry_delay_ms ({})",
                self.max_retry_delay_ms, self.retry_delay_ms
            )));
        }
        Ok(())
    }

    /// Retry policy described by this config
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_strategy,
            self.retry_delay_ms,
            self.max_retry_delay_ms,
            self.backoff_multiplier,
        )
    }

    /// Fallback wake-up interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Receipt wait limit
    pub fn confirmation_timeout(&self) -> Option<Duration> {
        self.confirmation_timeout_ms.map(Duration::from_millis)
    }
}
