//! Retry policy with bounded exponential backoff.
//!
//! Only errors for which [`StorageError::is_retryable`] holds are retried;
//! not-found and access-denied surface on the first attempt.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{info_span, warn, Instrument};

use crate::error::StorageResult;
use crate::metrics::{record_operation, record_retry};

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: u32,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Execute a storage operation with retry.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    backend: &str,
    operation: &str,
    op: F,
) -> StorageResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let started = Instant::now();
    let mut attempt = 1u32;

    loop {
        let span = info_span!("storage_op", backend = %backend, operation = %operation, attempt);

        match op().instrument(span).await {
            Ok(value) => {
                record_operation(backend, operation, true, started.elapsed().as_secs_f64() * 1000.0);
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    backend = %backend,
                    operation = %operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Storage operation failed, retrying: {}",
                    e
                );
                record_retry(backend, operation);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                record_operation(backend, operation, false, started.elapsed().as_secs_f64() * 1000.0);
                return Err(e);
            }
        }
    }
}
