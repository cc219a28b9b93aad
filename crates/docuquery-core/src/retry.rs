//! Retry policy for external calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};

/// Exponential backoff applied to each external call.
///
/// `max_attempts` counts the first call, so the default of 3 means one call plus two
/// retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry (milliseconds).
    pub base_delay_ms: u64,
    /// Upper bound on a single delay (milliseconds).
    pub max_delay_ms: u64,
    /// Multiplier applied after each retry.
    pub factor: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget with zero delay between attempts.
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Backoff builder for this policy.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
            .with_min_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)))
            .with_factor(self.factor)
    }

    /// Run a service call, retrying transient failures and timeouts.
    pub async fn run<T, F, Fut>(&self, operation: &str, call: F) -> ServiceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        self.run_when(operation, call, ServiceError::is_retryable).await
    }

    /// Run any fallible call, retrying errors matching `when`.
    pub async fn run_when<T, E, F, Fut, W>(&self, operation: &str, call: F, when: W) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        W: FnMut(&E) -> bool,
        E: Display,
    {
        call.retry(self.backoff())
            .when(when)
            .notify(|err, delay| {
                tracing::warn!(operation, error = %err, ?delay, "Call failed, retrying");
            })
            .await
    }
}
