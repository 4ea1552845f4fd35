//! Retry policy for reconnects.
//!
//! A [`RetryPolicy`] describes how many times a failed connect may be retried
//! and how long to pause in between. [`RetryBudget`] tracks one reconnect
//! episode against that policy.

use std::time::Duration;

use tracing::debug;

use crate::config::ClientConfig;

/// How failed connects are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Negative means unlimited, zero means none.
    pub limit: i32,
    /// Pause between attempts.
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 1,
            wait: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(limit: i32, wait: Duration) -> Self {
        Self { limit, wait }
    }

    /// Policy taken from a client configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.retry_limit, config.retry_wait_duration())
    }

    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.limit < 0
    }

    /// Start tracking a new episode.
    #[must_use]
    pub fn budget(&self) -> RetryBudget {
        RetryBudget {
            policy: *self,
            retries: 0,
        }
    }
}

/// Retries consumed in one reconnect episode.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    policy: RetryPolicy,
    retries: u32,
}

impl RetryBudget {
    /// Retries spent so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Whether another attempt is allowed after a failure.
    pub fn may_retry(&self) -> bool {
        if self.policy.is_unlimited() {
            return true;
        }
        i64::from(self.retries) < i64::from(self.policy.limit)
    }

    /// Consume one retry and sleep for the configured wait.
    ///
    /// Returns `false` without sleeping when the budget is spent.
    pub async fn pause(&mut self) -> bool {
        if !self.may_retry() {
            return false;
        }
        self.retries += 1;

        debug!(
            retry = self.retries,
            limit = self.policy.limit,
            wait_ms = self.policy.wait.as_millis() as u64,
            "Waiting before reconnect attempt"
        );

        if !self.policy.wait.is_zero() {
            tokio::time::sleep(self.policy.wait).await;
        }
        true
    }
}
