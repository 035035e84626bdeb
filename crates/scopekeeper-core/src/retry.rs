// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry policy shared by backends and the finalizer.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Retry strategy.
///
/// Determines how delay between retry attempts is calculated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryStrategy {
    /// Exponential backoff: delay * 2^(attempt-1)
    ///
    /// First retry: delay * 1
    /// Second retry: delay * 2
    /// Third retry: delay * 4
    /// ...
    #[default]
    ExponentialBackoff,
    /// Same delay before every retry.
    Fixed,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries, just one attempt).
    pub max_retries: u32,
    /// Base delay between retries in milliseconds.
    pub delay_ms: u64,
    /// Upper bound for a single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Retry strategy for calculating delays.
    pub strategy: RetryStrategy,
}

/// Final failure of a retried operation.
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// Number of attempts made (including the first).
    pub attempts: u32,
    /// Error returned by the last attempt.
    pub error: E,
}

impl RetryPolicy {
    /// Create a new retry policy with exponential backoff.
    pub fn new(max_retries: u32, delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            delay_ms,
            max_delay_ms,
            strategy: RetryStrategy::ExponentialBackoff,
        }
    }

    /// A single attempt, never retried.
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    /// Retry `max_retries` times without waiting in between.
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, 0, 0)
    }

    /// Total number of attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Calculate delay for a given attempt (1-indexed).
    ///
    /// Returns the duration to wait before the given retry attempt.
    /// Attempt 1 is the first retry (after the initial failure).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = match self.strategy {
            RetryStrategy::ExponentialBackoff => {
                2u64.saturating_pow(attempt.saturating_sub(1))
            }
            RetryStrategy::Fixed => 1,
        };
        let delay = self.delay_ms.saturating_mul(multiplier);
        let capped = if self.max_delay_ms > 0 {
            delay.min(self.max_delay_ms)
        } else {
            delay
        };
        Duration::from_millis(capped)
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the
    /// policy is exhausted.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        operation: &str,
        mut op: F,
        is_retryable: P,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt > self.max_retries || !is_retryable(&error) {
                        return Err(RetryFailure {
                            attempts: attempt,
                            error,
                        });
                    }
                    let delay = self.delay_for_attempt(attempt);
                    debug!(
                        operation = operation,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after failure"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 200, 5_000)
    }
}
