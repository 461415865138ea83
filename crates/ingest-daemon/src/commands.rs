//! Command implementations for `ingestd`.
//!
//! Handles:
//! - run: load config, open state and index, execute one ingestion run
//! - status: per-tenant document counts from the state store
//! - runs: recent entries of the run ledger

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tracing::{info, warn};

use ingest_embeddings::create_provider;
use ingest_pipeline::{
    CancellationToken, FilesystemSource, Orchestrator, PipelineConfig, TenantRegistry,
    TenantSource,
};
use ingest_storage::{ChangeDetectionStore, Storage, StorageStats};
use ingest_types::{expand_home, Settings};
use ingest_vector::RocksIndex;

/// CLI flags shared by every command.
#[derive(Debug, Default, Clone)]
pub struct GlobalOptions {
    pub config_path: Option<String>,
    pub log_level: Option<String>,
    pub db_path: Option<String>,
}

/// Flags of the `run` command.
#[derive(Debug, Default, Clone)]
pub struct RunOptions {
    pub tenants: Vec<String>,
    pub index_path: Option<String>,
    pub deadline_secs: Option<u64>,
    pub keep_removed: bool,
    pub json: bool,
}

/// Load configuration and apply CLI overrides (highest precedence).
pub fn load_settings(global: &GlobalOptions) -> Result<Settings> {
    let mut settings =
        Settings::load(global.config_path.as_deref()).context("Failed to load configuration")?;

    if let Some(db_path) = &global.db_path {
        settings.db_path = db_path.clone();
    }
    if let Some(log_level) = &global.log_level {
        settings.log_level = log_level.clone();
    }

    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

/// Install the global tracing subscriber; `RUST_LOG` wins over `log_level`.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn open_storage(settings: &Settings) -> Result<Arc<Storage>> {
    let db_path = settings.expanded_db_path();
    info!("Opening state store at {:?}", db_path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let storage = Storage::open(&db_path).context("Failed to open state store")?;
    Ok(Arc::new(storage))
}

/// Build the sources of the selected tenants, in configuration order.
///
/// An empty selection means every configured tenant.
pub fn build_sources(settings: &Settings, selected: &[String]) -> Result<Vec<TenantSource>> {
    for id in selected {
        if !settings.tenants.iter().any(|t| &t.id == id) {
            bail!("Unknown tenant: {}", id);
        }
    }

    let mut sources = Vec::new();
    for tenant in &settings.tenants {
        if !selected.is_empty() && !selected.contains(&tenant.id) {
            continue;
        }
        for source in &tenant.sources {
            if source.source_type != FilesystemSource::SOURCE_TYPE {
                bail!(
                    "Tenant {}: unsupported source type {:?} for source {}",
                    tenant.id,
                    source.source_type,
                    source.name
                );
            }
            let fs_source = FilesystemSource::new(&source.name, expand_home(&source.root))
                .with_extensions(&source.extensions);
            sources.push(TenantSource::new(&tenant.id, fs_source));
        }
    }
    Ok(sources)
}

/// Cancel `token` on Ctrl+C or SIGTERM.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, cancelling run..."),
            _ = terminate => info!("Received SIGTERM, cancelling run..."),
            _ = token.cancelled() => return,
        }
        token.cancel();
    });
}

/// Execute one ingestion run.
///
/// Returns an error only for fatal conditions (configuration, storage,
/// pre-flight). Per-document failures are reported in the summary.
pub async fn run_ingestion(global: &GlobalOptions, options: RunOptions) -> Result<()> {
    let mut settings = load_settings(global)?;
    if let Some(index_path) = &options.index_path {
        settings.index_path = index_path.clone();
    }
    init_logging(&settings.log_level)?;

    let tenants = TenantRegistry::resolve(&settings).context("Invalid tenant configuration")?;
    let sources = build_sources(&settings, &options.tenants)?;
    if sources.is_empty() {
        warn!("No sources configured for the selected tenants");
    }

    let storage = open_storage(&settings)?;
    let store = Arc::new(ChangeDetectionStore::new(storage.clone()));

    let index_path = settings.expanded_index_path();
    info!("Opening vector index at {:?}", index_path);
    fs::create_dir_all(&index_path).context("Failed to create index directory")?;
    let index = Arc::new(RocksIndex::open(&index_path).context("Failed to open vector index")?);

    let provider =
        create_provider(&settings.embedding).context("Failed to create embedding provider")?;

    let mut config = PipelineConfig::from_settings(&settings.pipeline);
    if let Some(secs) = options.deadline_secs {
        config = config.with_run_deadline(Some(Duration::from_secs(secs)));
    }
    if options.keep_removed {
        config = config.with_tombstones(false);
    }

    let orchestrator = Orchestrator::new(tenants, store, provider, index, config);
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let report = orchestrator
        .run(sources, cancel.clone())
        .await
        .context("Ingestion run failed")?;
    cancel.cancel();
    if let Err(e) = storage.flush() {
        warn!(error = %e, "Failed to flush state store");
    }

    if options.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to encode run summary")?
        );
    } else {
        println!("{}", report.run.summary_line());
        if report.run.cancelled {
            println!("Run was cancelled before completion");
        }
        for failure in &report.run.failures {
            println!("  failed {}: {}", failure.key, failure.reason);
        }
    }
    Ok(())
}

/// Show per-tenant document counts.
pub fn show_status(global: &GlobalOptions, tenant: Option<&str>) -> Result<()> {
    let settings = load_settings(global)?;
    init_logging(&settings.log_level)?;
    print_status(&settings, tenant)
}

fn print_status(settings: &Settings, tenant: Option<&str>) -> Result<()> {
    if let Some(id) = tenant {
        if !settings.tenants.iter().any(|t| t.id == id) {
            bail!("Unknown tenant: {}", id);
        }
    }
    let storage = open_storage(settings)?;
    let store = ChangeDetectionStore::new(storage);

    println!(
        "{:<20} {:>8} {:>8} {:>10} {:>8} {:>10}",
        "TENANT", "INDEXED", "FAILED", "PROCESSING", "PENDING", "TOMBSTONED"
    );
    for t in &settings.tenants {
        if tenant.is_some_and(|id| id != t.id) {
            continue;
        }
        let counts = store
            .status_counts(&t.id)
            .with_context(|| format!("Failed to read state of tenant {}", t.id))?;
        println!(
            "{:<20} {:>8} {:>8} {:>10} {:>8} {:>10}",
            t.id,
            counts.indexed,
            counts.failed,
            counts.processing,
            counts.pending,
            counts.tombstoned
        );
    }

    let stats = store
        .storage()
        .get_stats()
        .context("Failed to read storage statistics")?;
    println!();
    println!("{}", format_storage_stats(&stats));
    Ok(())
}

fn format_storage_stats(stats: &StorageStats) -> String {
    format!(
        "State store: {} document rows, {} runs, {:.1} MiB on disk",
        stats.document_count,
        stats.run_count,
        stats.disk_usage_bytes as f64 / (1024.0 * 1024.0)
    )
}

/// List recent runs from the ledger.
pub fn list_runs(global: &GlobalOptions, limit: usize, json: bool) -> Result<()> {
    let settings = load_settings(global)?;
    init_logging(&settings.log_level)?;
    print_runs(&settings.expanded_db_path(), limit, json)
}

fn print_runs(db_path: &Path, limit: usize, json: bool) -> Result<()> {
    let storage = Storage::open(db_path).context("Failed to open state store")?;
    let runs = storage.list_runs(limit).context("Failed to read run ledger")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&runs).context("Failed to encode runs")?
        );
        return Ok(());
    }
    if runs.is_empty() {
        println!("No runs recorded");
    }
    for run in &runs {
        println!("{}  {}", run.started_at.format("%Y-%m-%d %H:%M:%S"), run.summary_line());
    }
    Ok(())
}

/// Print the effective configuration after every layer is applied.
pub fn show_config(global: &GlobalOptions) -> Result<()> {
    let settings = load_settings(global)?;
    print!("{}", render_config(&settings)?);
    Ok(())
}

/// Render settings as TOML with the embedding API key masked.
pub fn render_config(settings: &Settings) -> Result<String> {
    let mut settings = settings.clone();
    if settings.embedding.api_key.is_some() {
        settings.embedding.api_key = Some("<redacted>".to_string());
    }
    toml::to_string_pretty(&settings).context("Failed to encode configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_types::{SourceSettings, TenantSettings};

    fn settings() -> Settings {
        let mut acme = TenantSettings::new("acme");
        acme.sources.push(SourceSettings {
            source_type: "filesystem".to_string(),
            name: "handbook".to_string(),
            root: "/srv/handbook".to_string(),
            extensions: vec!["md".to_string()],
        });
        let mut globex = TenantSettings::new("globex");
        globex.sources.push(SourceSettings {
            source_type: "filesystem".to_string(),
            name: "wiki".to_string(),
            root: "/srv/wiki".to_string(),
            extensions: Vec::new(),
        });
        Settings {
            tenants: vec![acme, globex],
            ..Default::default()
        }
    }

    #[test]
    fn test_build_sources_all_tenants() {
        let sources = build_sources(&settings(), &[]).unwrap();
        let ids: Vec<_> = sources.iter().map(|s| s.tenant_id.as_str()).collect();
        assert_eq!(ids, vec!["acme", "globex"]);
        assert_eq!(sources[0].source.source_name(), "handbook");
        assert_eq!(sources[1].source.source_type(), "filesystem");
    }

    #[test]
    fn test_build_sources_selected_tenant() {
        let sources = build_sources(&settings(), &["globex".to_string()]).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].tenant_id, "globex");
    }

    #[test]
    fn test_build_sources_unknown_tenant() {
        let result = build_sources(&settings(), &["initech".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_build_sources_rejects_unknown_type() {
        let mut settings = settings();
        settings.tenants[0].sources[0].source_type = "s3".to_string();
        assert!(build_sources(&settings, &[]).is_err());
    }

    #[test]
    fn test_print_runs_empty_ledger() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        assert!(print_runs(temp_dir.path(), 10, false).is_ok());
    }

    #[test]
    fn test_print_status_unknown_tenant() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut settings = settings();
        settings.db_path = temp_dir.path().to_string_lossy().to_string();
        assert!(print_status(&settings, Some("initech")).is_err());
        assert!(print_status(&settings, Some("acme")).is_ok());
    }

    #[test]
    fn test_render_config_redacts_api_key() {
        let mut settings = settings();
        settings.embedding.api_key = Some("sk-secret".to_string());
        let rendered = render_config(&settings).unwrap();
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("handbook"));

        let parsed: Settings = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.tenants.len(), 2);
    }

    #[test]
    fn test_format_storage_stats() {
        let stats = StorageStats {
            document_count: 12,
            run_count: 3,
            disk_usage_bytes: 3 * 1024 * 1024 / 2,
        };
        assert_eq!(
            format_storage_stats(&stats),
            "State store: 12 document rows, 3 runs, 1.5 MiB on disk"
        );
    }
}
