//! Retry with exponential backoff and per-call timeouts.
//!
//! Every external call of the pipeline (embedding requests, index writes)
//! goes through [`RetryPolicy::call`]. Only errors classified as transient
//! are retried; timeouts count as transient.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use ingest_embeddings::EmbeddingError;
use ingest_vector::VectorError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::monitor::StageStats;

/// Error classification used by the retry loop.
pub trait Retryable: Display {
    /// Whether the same call may succeed when repeated.
    fn retryable(&self) -> bool;

    /// The error reported when a call exceeds its timeout.
    fn timed_out() -> Self;
}

impl Retryable for EmbeddingError {
    fn retryable(&self) -> bool {
        self.is_transient()
    }

    fn timed_out() -> Self {
        EmbeddingError::Timeout
    }
}

impl Retryable for VectorError {
    fn retryable(&self) -> bool {
        self.is_transient()
    }

    fn timed_out() -> Self {
        VectorError::Timeout
    }
}

/// Bounded retry policy for one kind of external call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
            call_timeout,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            current_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Run `op` until it succeeds, fails permanently, exhausts the retry
    /// budget, or `cancel` fires. Each attempt is bounded by the call timeout.
    pub async fn call<T, E, F, Fut>(
        &self,
        label: &str,
        stats: &StageStats,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut backoff = self.backoff();
        let mut retries = 0;

        loop {
            let err = match tokio::time::timeout(self.call_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => E::timed_out(),
            };

            if !err.retryable() {
                debug!(call = label, error = %err, "Permanent failure");
                return Err(err);
            }
            if retries >= self.max_retries {
                warn!(call = label, error = %err, retries, "Max retries exceeded");
                return Err(err);
            }
            if cancel.is_cancelled() {
                return Err(err);
            }

            let Some(delay) = backoff.next_backoff() else {
                return Err(err);
            };
            retries += 1;
            stats.record_retry();
            warn!(
                call = label,
                error = %err,
                attempt = retries,
                retry_in_ms = delay.as_millis() as u64,
                "Transient failure, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(err),
            }
        }
    }
}
