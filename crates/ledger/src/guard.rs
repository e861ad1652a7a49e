//! Consistency guard: bounded retry of optimistic-version conflicts.

use std::future::Future;
use std::time::Duration;

use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// Retry budget for stale-version conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first conflict.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget and delays.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Creates a policy that retries immediately, without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Runs ledger mutations, retrying stale versions with exponential backoff.
///
/// Only [`LedgerError::StaleVersion`] is retried. Every other error is
/// returned unmodified on first occurrence. Once the budget is spent the
/// guard fails with [`LedgerError::ConcurrencyExhausted`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsistencyGuard {
    policy: RetryPolicy,
}

impl ConsistencyGuard {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op` until it stops failing with a stale version.
    ///
    /// `op` must re-read whatever it mutates on every call.
    pub async fn run<T, F, Fut>(&self, product_id: &ProductId, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Err(e) if e.is_stale() => {
                    if attempt >= max_attempts {
                        metrics::counter!("ledger_concurrency_exhausted_total").increment(1);
                        tracing::warn!(%product_id, attempts = attempt, "stale version retries exhausted");
                        return Err(LedgerError::ConcurrencyExhausted {
                            product_id: product_id.clone(),
                            attempts: attempt,
                        });
                    }

                    let delay = self.policy.delay_for(attempt - 1);
                    metrics::counter!("ledger_stale_version_retries_total").increment(1);
                    tracing::debug!(%product_id, attempt, ?delay, "stale version, retrying");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                other => return other,
            }
        }
    }
}
