//! Retry with exponential backoff and random jitter.
//!
//! [`RetryPolicy`] re-runs a failing async operation until it succeeds, the
//! error is classified as fatal, the caller cancels, or the retry budget is
//! spent. The policy itself is immutable, so one instance can drive any number
//! of concurrent operations; each call owns its attempt counter.
//!
//! # Delay Schedule
//!
//! ```text
//! retry n sleeps  base_delay * multiplier^(n-1) + uniform(0, jitter)
//! ```
//!
//! With the defaults (500ms, x2, 1000ms jitter) the first three retries wait
//! roughly 0.5-1.5s, 1-2s and 2-3s.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::{DownloadError, DownloadResult};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry (500ms).
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Default backoff multiplier.
pub const DEFAULT_MULTIPLIER: u32 = 2;

/// Default upper bound (exclusive) of the random jitter (1s).
pub const DEFAULT_JITTER_MS: u64 = 1000;

/// Exponential backoff retry executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; an operation runs at most `max_retries + 1` times.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Factor applied to the delay after every retry.
    pub multiplier: u32,
    /// Exclusive upper bound of the uniform random jitter added to each delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            multiplier: DEFAULT_MULTIPLIER,
            jitter: Duration::from_millis(DEFAULT_JITTER_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, multiplier: u32, jitter: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            multiplier: multiplier.max(1),
            jitter,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, 1, Duration::ZERO)
    }

    /// Deterministic part of the delay before retry `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Full delay before retry `retry` (1-based), including jitter.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let backoff = self.backoff(retry);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return backoff;
        }
        let jitter = rand::rng().random_range(0..jitter_ms);
        backoff.saturating_add(Duration::from_millis(jitter))
    }

    /// Run `operation`, retrying errors that [`DownloadError::is_fatal`] does not reject.
    pub async fn execute<T, Op, Fut>(
        &self,
        task: &str,
        cancel: &CancellationToken,
        operation: Op,
    ) -> DownloadResult<T>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = DownloadResult<T>>,
    {
        self.execute_with(task, cancel, DownloadError::is_fatal, operation)
            .await
    }

    /// Run `operation` with a caller-supplied fatal-error classifier.
    ///
    /// Cancellation always propagates immediately regardless of `is_fatal`;
    /// pass `|_| false` to retry every other error.
    pub async fn execute_with<T, Op, Fut, C>(
        &self,
        task: &str,
        cancel: &CancellationToken,
        is_fatal: C,
        mut operation: Op,
    ) -> DownloadResult<T>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = DownloadResult<T>>,
        C: Fn(&DownloadError) -> bool,
    {
        let mut retry = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if err.is_cancelled() || is_fatal(&err) {
                return Err(err);
            }

            if retry >= self.max_retries {
                tracing::error!(task, error = %err, "{} failed. No retries remaining", task);
                return Err(err);
            }

            retry += 1;
            let delay = self.delay_for_retry(retry);
            tracing::warn!(
                task,
                retry,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "{} failed. Attempting {} retry",
                task,
                ordinal(retry)
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// `1st`, `2nd`, `3rd`, `4th`, ... `11th`, `12th`, `13th`, `21st`.
pub fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}
