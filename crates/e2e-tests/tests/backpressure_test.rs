//! Backpressure: a slow publication stage throttles enumeration.
//!
//! Queues are bounded, so when the index is slow the number of documents
//! pulled from the source but not yet published stays bounded by the queue
//! and worker capacity, independent of how many documents the source has.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use e2e_tests::{
    fast_config, static_source, tenants, CountingSource, RecordingIndex, ScriptedEmbedder,
    TestHarness,
};
use ingest_pipeline::{CancellationToken, TenantSource};
use ingest_types::RunStatus;

const DOCUMENTS: usize = 60;

#[tokio::test]
async fn test_slow_index_bounds_documents_in_flight() {
    let docs: Vec<(String, String)> = (0..DOCUMENTS)
        .map(|i| (format!("doc-{:03}", i), format!("short body {}", i)))
        .collect();
    let refs: Vec<(&str, &str)> = docs
        .iter()
        .map(|(id, text)| (id.as_str(), text.as_str()))
        .collect();
    let source = CountingSource::new(static_source("bulk", &refs));
    let pulled = source.counter();

    let harness = TestHarness::with_index(
        RecordingIndex::new()
            .with_upsert_delay(Duration::from_millis(5))
            .with_pull_counter(pulled.clone()),
    );
    let config = fast_config()
        .with_queue_capacity(1)
        .with_workers(1, 1, 1)
        .with_embed_batch(1, 1 << 20)
        .with_publish_batch_points(1);
    let orchestrator =
        harness.orchestrator(tenants(&["t1"]), Arc::new(ScriptedEmbedder::new()), config);

    let report = orchestrator
        .run(vec![TenantSource::new("t1", source)], CancellationToken::new())
        .await
        .unwrap();

    // Nothing was lost to the throttling
    assert_eq!(report.run.status, RunStatus::Success);
    assert_eq!(report.run.documents_indexed, DOCUMENTS as u64);
    assert_eq!(harness.point_ids("t1").len(), DOCUMENTS);
    assert_eq!(harness.index.upserts(), DOCUMENTS);

    // One item per queue slot and worker, plus the item intake holds
    let backlog = harness.index.max_backlog();
    assert!(backlog > 0);
    assert!(
        backlog <= 16,
        "enumeration ran {} documents ahead of publication",
        backlog
    );
    assert_eq!(pulled.load(std::sync::atomic::Ordering::SeqCst), DOCUMENTS);
}
