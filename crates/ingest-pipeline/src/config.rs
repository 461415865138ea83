//! Runtime configuration of the pipeline stages.

use std::time::Duration;

use ingest_types::PipelineSettings;

use crate::error::PipelineError;
use crate::retry::RetryPolicy;

/// Queue, worker, batching and timeout configuration for one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub document_queue_capacity: usize,
    pub fragment_queue_capacity: usize,
    pub vector_queue_capacity: usize,
    pub publish_queue_capacity: usize,

    pub fragment_workers: usize,
    pub embed_workers: usize,
    pub publish_workers: usize,

    /// Maximum fragments per embedding call
    pub embed_batch_size: usize,
    /// Maximum content bytes per embedding call
    pub embed_batch_bytes: usize,
    /// How long a partial embedding batch waits for more fragments
    pub batch_linger: Duration,
    /// Concurrent embedding calls across all workers
    pub max_in_flight: usize,
    /// Maximum points per index upsert
    pub publish_batch_points: usize,

    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub embed_timeout: Duration,
    pub publish_timeout: Duration,

    /// Grace period for in-flight work once the run is cancelled
    pub drain_timeout: Duration,
    /// Cancel the run after this long
    pub run_deadline: Option<Duration>,

    /// Delete index points of documents that disappeared from their source
    pub tombstone_removed: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(&PipelineSettings::default())
    }
}

impl PipelineConfig {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            document_queue_capacity: settings.document_queue_capacity,
            fragment_queue_capacity: settings.fragment_queue_capacity,
            vector_queue_capacity: settings.vector_queue_capacity,
            publish_queue_capacity: settings.publish_queue_capacity,
            fragment_workers: settings.fragment_workers,
            embed_workers: settings.embed_workers,
            publish_workers: settings.publish_workers,
            embed_batch_size: settings.embed_batch_size,
            embed_batch_bytes: settings.embed_batch_bytes,
            batch_linger: Duration::from_millis(settings.batch_linger_ms),
            max_in_flight: settings.max_in_flight,
            publish_batch_points: settings.publish_batch_points,
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            embed_timeout: Duration::from_millis(settings.embed_timeout_ms),
            publish_timeout: Duration::from_millis(settings.publish_timeout_ms),
            drain_timeout: Duration::from_secs(settings.drain_timeout_secs),
            run_deadline: settings.run_deadline_secs.map(Duration::from_secs),
            tombstone_removed: settings.tombstone_removed,
        }
    }

    /// Set every queue capacity at once.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.document_queue_capacity = capacity;
        self.fragment_queue_capacity = capacity;
        self.vector_queue_capacity = capacity;
        self.publish_queue_capacity = capacity;
        self
    }

    /// Set the worker count of the fragment, embed and publish pools.
    pub fn with_workers(mut self, fragment: usize, embed: usize, publish: usize) -> Self {
        self.fragment_workers = fragment;
        self.embed_workers = embed;
        self.publish_workers = publish;
        self
    }

    pub fn with_embed_batch(mut self, size: usize, bytes: usize) -> Self {
        self.embed_batch_size = size;
        self.embed_batch_bytes = bytes;
        self
    }

    pub fn with_batch_linger(mut self, linger: Duration) -> Self {
        self.batch_linger = linger;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_publish_batch_points(mut self, points: usize) -> Self {
        self.publish_batch_points = points;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self.max_backoff = self.max_backoff.max(initial_backoff);
        self
    }

    pub fn with_call_timeouts(mut self, embed: Duration, publish: Duration) -> Self {
        self.embed_timeout = embed;
        self.publish_timeout = publish;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn with_run_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.run_deadline = deadline;
        self
    }

    pub fn with_tombstones(mut self, enabled: bool) -> Self {
        self.tombstone_removed = enabled;
        self
    }

    /// Reject sizes that would make a stage unable to make progress.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let positive = [
            ("document_queue_capacity", self.document_queue_capacity),
            ("fragment_queue_capacity", self.fragment_queue_capacity),
            ("vector_queue_capacity", self.vector_queue_capacity),
            ("publish_queue_capacity", self.publish_queue_capacity),
            ("fragment_workers", self.fragment_workers),
            ("embed_workers", self.embed_workers),
            ("publish_workers", self.publish_workers),
            ("embed_batch_size", self.embed_batch_size),
            ("embed_batch_bytes", self.embed_batch_bytes),
            ("max_in_flight", self.max_in_flight),
            ("publish_batch_points", self.publish_batch_points),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(PipelineError::Config(format!("pipeline.{} must be > 0", name)));
            }
        }
        if self.embed_timeout.is_zero() || self.publish_timeout.is_zero() {
            return Err(PipelineError::Config(
                "pipeline call timeouts must be > 0".to_string(),
            ));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(PipelineError::Config(format!(
                "pipeline initial backoff ({:?}) exceeds max backoff ({:?})",
                self.initial_backoff, self.max_backoff
            )));
        }
        Ok(())
    }

    /// Retry policy for embedding calls.
    pub fn embed_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            self.initial_backoff,
            self.max_backoff,
            self.embed_timeout,
        )
    }

    /// Retry policy for index writes and deletes.
    pub fn publish_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            self.initial_backoff,
            self.max_backoff,
            self.publish_timeout,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let settings = PipelineSettings {
            batch_linger_ms: 5,
            run_deadline_secs: Some(60),
            ..Default::default()
        };
        let config = PipelineConfig::from_settings(&settings);
        assert_eq!(config.batch_linger, Duration::from_millis(5));
        assert_eq!(config.run_deadline, Some(Duration::from_secs(60)));
        assert_eq!(config.max_in_flight, settings.max_in_flight);
    }

    #[test]
    fn test_builder() {
        let config = PipelineConfig::default()
            .with_queue_capacity(1)
            .with_workers(1, 2, 3)
            .with_retries(5, Duration::from_secs(20));
        assert_eq!(config.fragment_queue_capacity, 1);
        assert_eq!(config.publish_workers, 3);
        assert_eq!(config.max_retries, 5);
        assert!(config.max_backoff >= config.initial_backoff);
    }

    #[test]
    fn test_validate() {
        assert!(PipelineConfig::default().validate().is_ok());

        let err = PipelineConfig::default()
            .with_queue_capacity(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("document_queue_capacity"));

        let err = PipelineConfig::default()
            .with_workers(1, 0, 1)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("embed_workers"));

        assert!(PipelineConfig::default()
            .with_max_in_flight(0)
            .validate()
            .is_err());
        assert!(PipelineConfig::default()
            .with_call_timeouts(Duration::ZERO, Duration::from_secs(1))
            .validate()
            .is_err());
    }
}
