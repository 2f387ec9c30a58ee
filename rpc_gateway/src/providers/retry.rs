//! Retry and backoff policies
//!
//! [`retry`] drives an operation until it succeeds, fails permanently, runs
//! out of attempts, or is cancelled. Endpoint selection and health bookkeeping
//! live in the operation itself; this module only decides *whether* and *when*
//! to try again.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{GatewayError, Result};

/// Shape of the delay curve between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay after every failure
    Constant,

    /// `failures * base`
    Linear,

    /// `base * 2^(failures - 1)`
    Exponential,
}

/// Delay calculation between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(strategy: BackoffStrategy, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy,
            base_delay,
            max_delay,
        }
    }

    pub fn constant(delay: Duration) -> Self {
        Self::new(BackoffStrategy::Constant, delay, delay)
    }

    pub fn linear(base_delay: Duration) -> Self {
        Self::new(BackoffStrategy::Linear, base_delay, Duration::MAX)
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self::new(BackoffStrategy::Exponential, base_delay, max_delay)
    }

    /// Delay to wait after `failures` failed attempts (1-based)
    pub fn delay_for(&self, failures: u32) -> Duration {
        let failures = failures.max(1);
        let delay = match self.strategy {
            BackoffStrategy::Constant => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(failures),
            BackoffStrategy::Exponential => {
                let factor = 2u32.checked_pow(failures - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }
}

/// Attempt budget plus backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Exactly one attempt
    pub fn no_retry() -> Self {
        Self::new(1, BackoffPolicy::constant(Duration::ZERO))
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, BackoffPolicy::linear(Duration::from_secs(1)))
    }
}

/// Run `operation` under `policy`
///
/// `operation` receives the 1-based attempt number. Errors for which
/// [`GatewayError::is_retryable`] is false are returned unchanged. When the
/// budget is spent the last error is wrapped in
/// [`GatewayError::ExhaustedRetries`] with an empty `endpoints_tried`; callers
/// that know endpoint identities fill it in. Cancellation is observed both
/// during an attempt and during the backoff sleep.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut failures = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled { attempts: failures });
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(GatewayError::Cancelled { attempts: failures + 1 });
            }
            outcome = operation(failures + 1) => outcome,
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        failures += 1;
        if failures >= max_attempts {
            return Err(GatewayError::ExhaustedRetries {
                attempts: failures,
                endpoints_tried: Vec::new(),
                last_error: Box::new(err),
            });
        }

        let delay = policy.backoff.delay_for(failures);
        debug!(
            attempt = failures,
            max_attempts = max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after backoff"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(GatewayError::Cancelled { attempts: failures });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
