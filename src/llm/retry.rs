//! Retry policy for transient completion failures.
//!
//! Exponential backoff with jitter. Only errors that report
//! [`PipelineError::is_retryable`] are retried.

use crate::error::{PipelineError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// How many times, and how patiently, a transient failure is retried.
///
/// The wait before retry `n` is `base_delay_ms * 2^(n-1)`, capped at
/// `max_delay_ms`, plus up to 10% jitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub base_delay_ms: u64,
    /// Longest wait between retries, before jitter.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Set the retry count.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the first retry delay.
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set the delay ceiling.
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Capped doubling backoff for `retry` (1-based), before jitter.
    fn backoff(&self, retry: u32) -> Duration {
        let doublings = retry.saturating_sub(1).min(32);
        let millis = self
            .base_delay_ms
            .saturating_mul(1u64 << doublings)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the zero-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !error.is_retryable() || attempt >= self.max_attempts {
                        return Err(error);
                    }
                    attempt = attempt.saturating_add(1);
                    let backoff = self.backoff(attempt);
                    let delay =
                        backoff + backoff.mul_f64(rand::thread_rng().gen_range(0.0..0.1));
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "transient completion failure, retrying: {error}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Map a non-success HTTP status to a completion error.
///
/// 429 and 5xx are transient; every other status is permanent.
pub fn classify_status(status: u16, body: &str) -> PipelineError {
    let snippet: String = body.chars().take(200).collect();
    let message = format!("HTTP {status}: {snippet}");
    if status == 429 || (500..600).contains(&status) {
        PipelineError::transient(message)
    } else {
        PipelineError::permanent(message)
    }
}
