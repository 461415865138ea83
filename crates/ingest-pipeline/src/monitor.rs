//! Run monitor.
//!
//! Lock-free per-stage counters updated by the stage workers. A snapshot is
//! logged when the run ends and returned alongside the run summary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Pipeline stages with their own counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fragment,
    Vectorize,
    Publish,
    Tombstone,
}

/// Counters of one stage.
#[derive(Debug, Default)]
pub struct StageStats {
    items_ok: AtomicU64,
    items_failed: AtomicU64,
    batches: AtomicU64,
    retries: AtomicU64,
    total_latency_us: AtomicU64,
    max_latency_us: AtomicU64,
}

impl StageStats {
    /// Record one unit of work (a document or a batch) and its latency.
    pub fn record_batch(&self, ok: u64, failed: u64, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.items_ok.fetch_add(ok, Ordering::Relaxed);
        self.items_failed.fetch_add(failed, Ordering::Relaxed);
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(micros, Ordering::Relaxed);
        self.max_latency_us.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StageSnapshot {
        let batches = self.batches.load(Ordering::Relaxed);
        let total = self.total_latency_us.load(Ordering::Relaxed);
        StageSnapshot {
            items_ok: self.items_ok.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            batches,
            retries: self.retries.load(Ordering::Relaxed),
            total_latency_us: total,
            max_latency_us: self.max_latency_us.load(Ordering::Relaxed),
            mean_latency_us: if batches == 0 { 0 } else { total / batches },
        }
    }
}

/// Point-in-time view of one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageSnapshot {
    pub items_ok: u64,
    pub items_failed: u64,
    pub batches: u64,
    pub retries: u64,
    pub total_latency_us: u64,
    pub max_latency_us: u64,
    pub mean_latency_us: u64,
}

/// Point-in-time view of all stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorSnapshot {
    pub fragment: StageSnapshot,
    pub vectorize: StageSnapshot,
    pub publish: StageSnapshot,
    pub tombstone: StageSnapshot,
}

/// Per-run stage counters.
#[derive(Debug, Default)]
pub struct RunMonitor {
    fragment: StageStats,
    vectorize: StageStats,
    publish: StageStats,
    tombstone: StageStats,
}

impl RunMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self, stage: Stage) -> &StageStats {
        match stage {
            Stage::Fragment => &self.fragment,
            Stage::Vectorize => &self.vectorize,
            Stage::Publish => &self.publish,
            Stage::Tombstone => &self.tombstone,
        }
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            fragment: self.fragment.snapshot(),
            vectorize: self.vectorize.snapshot(),
            publish: self.publish.snapshot(),
            tombstone: self.tombstone.snapshot(),
        }
    }
}
