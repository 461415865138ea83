//! Tenant isolation under one shared physical index.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use e2e_tests::{
    fast_config, key, point_tenant, static_source, tenants, ScriptedEmbedder, TestHarness,
    DIMENSION, INDEX,
};
use ingest_embeddings::HashEmbedder;
use ingest_pipeline::{CancellationToken, TenantSource};
use ingest_types::{meta, DocumentStatus};
use ingest_vector::{fields, PayloadFilter, VectorIndex};

/// Two tenants with identical document ids and sources never share points.
#[tokio::test]
async fn test_same_document_ids_stay_separate() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator(
        tenants(&["acme", "globex"]),
        Arc::new(ScriptedEmbedder::new()),
        fast_config(),
    );

    let sources = vec![
        TenantSource::new("acme", static_source("wiki", &[("A", "acme handbook")])),
        TenantSource::new("globex", static_source("wiki", &[("A", "globex handbook")])),
    ];
    let report = orchestrator
        .run(sources, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.run.documents_indexed, 2);
    assert_eq!(report.run.tenants, vec!["acme", "globex"]);

    assert_eq!(harness.point_ids("acme"), vec!["acme/static/wiki/A#0"]);
    assert_eq!(harness.point_ids("globex"), vec!["globex/static/wiki/A#0"]);

    for point in harness.points("acme") {
        assert_eq!(point_tenant(&point), Some("acme"));
        assert_eq!(point.payload_str(fields::CONTENT), Some("acme handbook"));
        assert_eq!(point.payload[fields::METADATA][meta::TENANT_NAME], "acme");
    }
}

/// A tenant-filtered query never returns another tenant's points, even when
/// the other tenant's content is the better match.
#[tokio::test]
async fn test_filtered_query_is_tenant_scoped() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator(
        tenants(&["acme", "globex"]),
        Arc::new(ScriptedEmbedder::new()),
        fast_config(),
    );
    let sources = vec![
        TenantSource::new(
            "acme",
            static_source("kb", &[("pricing", "enterprise pricing tiers")]),
        ),
        TenantSource::new(
            "globex",
            static_source("kb", &[("rockets", "rocket engine maintenance")]),
        ),
    ];
    orchestrator
        .run(sources, CancellationToken::new())
        .await
        .unwrap();

    let query = HashEmbedder::new(DIMENSION)
        .unwrap()
        .embed_one("rocket engine maintenance");
    let hits = harness
        .index
        .query(INDEX, &query.into_values(), &PayloadFilter::tenant("acme"), 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].payload[fields::TENANT_ID], "acme");
}

/// Changing one tenant's document leaves the other tenant untouched.
#[tokio::test]
async fn test_change_in_one_tenant_does_not_touch_another() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator(
        tenants(&["acme", "globex"]),
        Arc::new(ScriptedEmbedder::new()),
        fast_config(),
    );
    let sources = |acme_text: &str| {
        vec![
            TenantSource::new("acme", static_source("wiki", &[("A", acme_text)])),
            TenantSource::new("globex", static_source("wiki", &[("A", "stable")])),
        ]
    };

    orchestrator
        .run(sources("first"), CancellationToken::new())
        .await
        .unwrap();
    let globex_before = harness.state(&key("globex", "wiki", "A")).unwrap();

    let report = orchestrator
        .run(sources("second"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.run.documents_indexed, 1);
    assert_eq!(report.run.documents_skipped, 1);

    let globex_after = harness.state(&key("globex", "wiki", "A")).unwrap();
    assert_eq!(globex_after, globex_before);
    assert_eq!(globex_after.status, DocumentStatus::Indexed);

    let acme = harness.points("acme");
    assert_eq!(acme[0].payload_str(fields::CONTENT), Some("second"));
    assert_eq!(
        harness.points("globex")[0].payload_str(fields::CONTENT),
        Some("stable")
    );
}
