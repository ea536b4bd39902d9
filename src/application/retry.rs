//! Bounded retry with exponential backoff for persistence calls.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tracing::warn;

use crate::application::repos::RepoError;

const METRIC_PERSISTENCE_RETRY: &str = "eventgate_persistence_retry_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound for a single attempt.
    pub operation_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(1000),
            operation_timeout: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Delays slept between consecutive attempts; `max_attempts - 1` items.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let retries = self.max_attempts.max(1) - 1;
        (0..retries).map(move |attempt| {
            let factor = 2u32.saturating_pow(attempt);
            self.initial_backoff
                .saturating_mul(factor)
                .min(self.max_backoff)
        })
    }

    /// Runs `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Each attempt is bounded by `operation_timeout`; an elapsed attempt counts as
    /// [`RepoError::Timeout`], which is transient.
    pub async fn run<T, F, Fut>(&self, op: &'static str, mut operation: F) -> Result<T, RepoError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RepoError>>,
    {
        let mut delays = self.delays();
        let mut attempt = 1u32;
        loop {
            let result = match tokio::time::timeout(self.operation_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(RepoError::Timeout),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => err,
            };

            let Some(delay) = delays.next() else {
                return Err(err);
            };

            counter!(METRIC_PERSISTENCE_RETRY, "op" => op).increment(1);
            warn!(
                op,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient persistence failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
