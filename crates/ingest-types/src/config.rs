//! Configuration loading for the ingestion engine.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/ingest-engine/config.toml.

use std::collections::BTreeMap;
use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::document::{is_scope_segment, SCOPE_SEPARATOR};
use crate::error::IngestError;

const APP_NAME: &str = "ingest-engine";

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Provider name ("hashing" for the local provider, "openai" for any
    /// OpenAI-compatible endpoint)
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Model name sent to the provider
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector dimension; the index is created with this dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// API base URL (for custom endpoints)
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key (loaded from env var, not stored in config file)
    #[serde(default)]
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimension() -> usize {
    256
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            base_url: None,
            api_key: None,
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

/// Queue, worker and batching configuration for the pipeline stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
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
    /// How long a partial batch waits for more fragments
    pub batch_linger_ms: u64,
    /// Concurrent embedding calls across all workers
    pub max_in_flight: usize,
    /// Maximum points per index upsert
    pub publish_batch_points: usize,

    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub embed_timeout_ms: u64,
    pub publish_timeout_ms: u64,

    /// Grace period for in-flight work after cancellation
    pub drain_timeout_secs: u64,
    /// Whole-run deadline; no deadline when unset
    pub run_deadline_secs: Option<u64>,

    /// Delete index points of documents that disappeared from their source
    pub tombstone_removed: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            document_queue_capacity: 64,
            fragment_queue_capacity: 256,
            vector_queue_capacity: 256,
            publish_queue_capacity: 32,
            fragment_workers: 4,
            embed_workers: 2,
            publish_workers: 2,
            embed_batch_size: 32,
            embed_batch_bytes: 256 * 1024,
            batch_linger_ms: 20,
            max_in_flight: 4,
            publish_batch_points: 256,
            max_retries: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
            embed_timeout_ms: 30_000,
            publish_timeout_ms: 30_000,
            drain_timeout_secs: 30,
            run_deadline_secs: None,
            tombstone_removed: true,
        }
    }
}

impl PipelineSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
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
                return Err(format!("pipeline.{} must be > 0", name));
            }
        }
        if self.embed_timeout_ms == 0 || self.publish_timeout_ms == 0 {
            return Err("pipeline call timeouts must be > 0".to_string());
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(format!(
                "pipeline.initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            ));
        }
        Ok(())
    }
}

/// Global fragment sizing defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentationSettings {
    #[serde(default = "default_max_words")]
    pub max_words: usize,

    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,
}

fn default_max_words() -> usize {
    200
}

fn default_overlap_words() -> usize {
    20
}

impl Default for FragmentationSettings {
    fn default() -> Self {
        Self {
            max_words: default_max_words(),
            overlap_words: default_overlap_words(),
        }
    }
}

impl FragmentationSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_words == 0 {
            return Err("max_words must be > 0".to_string());
        }
        if self.overlap_words >= self.max_words {
            return Err(format!(
                "overlap_words ({}) must be smaller than max_words ({})",
                self.overlap_words, self.max_words
            ));
        }
        Ok(())
    }
}

/// Per-tenant overrides of the global defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantOverrideSettings {
    #[serde(default)]
    pub max_words: Option<usize>,

    #[serde(default)]
    pub overlap_words: Option<usize>,
}

/// A configured document source of one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Source type; only "filesystem" ships with the daemon
    #[serde(rename = "type", default = "default_source_type")]
    pub source_type: String,

    /// Source name, unique within the tenant
    pub name: String,

    /// Root directory for filesystem sources
    pub root: String,

    /// File extensions to include (without dot); all files when empty
    #[serde(default)]
    pub extensions: Vec<String>,
}

fn default_source_type() -> String {
    "filesystem".to_string()
}

/// One logical tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSettings {
    pub id: String,

    /// Defaults to the tenant id
    #[serde(default)]
    pub display_name: Option<String>,

    /// Defaults to the global index name
    #[serde(default)]
    pub index_name: Option<String>,

    #[serde(default)]
    pub overrides: TenantOverrideSettings,

    /// Metadata stamped onto every document of the tenant
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    #[serde(default)]
    pub sources: Vec<SourceSettings>,
}

impl TenantSettings {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            index_name: None,
            overrides: TenantOverrideSettings::default(),
            metadata: BTreeMap::new(),
            sources: Vec::new(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB state directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Path to the local vector index directory
    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Physical index shared by all tenants
    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Metadata stamped onto every document of every tenant
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub fragmentation: FragmentationSettings,

    #[serde(default)]
    pub tenants: Vec<TenantSettings>,
}

fn data_dir(leaf: &str, fallback: &str) -> String {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.data_local_dir().join(leaf))
        .unwrap_or_else(|| PathBuf::from(fallback))
        .to_string_lossy()
        .to_string()
}

fn default_db_path() -> String {
    data_dir("state", "./data/state")
}

fn default_index_path() -> String {
    data_dir("index", "./data/index")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_index_name() -> String {
    "documents".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            index_path: default_index_path(),
            log_level: default_log_level(),
            index_name: default_index_name(),
            metadata: BTreeMap::new(),
            embedding: EmbeddingSettings::default(),
            pipeline: PipelineSettings::default(),
            fragmentation: FragmentationSettings::default(),
            tenants: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/ingest-engine/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (INGEST_*, nested with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, IngestError> {
        let config_dir = ProjectDirs::from("", "", APP_NAME)
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| IngestError::Config(e.to_string()))?
            .set_default("index_path", default_index_path())
            .map_err(|e| IngestError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| IngestError::Config(e.to_string()))?
            .set_default("index_name", default_index_name())
            .map_err(|e| IngestError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: INGEST_DB_PATH, INGEST_EMBEDDING__API_KEY, INGEST_PIPELINE__EMBED_WORKERS
        builder = builder.add_source(
            Environment::with_prefix("INGEST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| IngestError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| IngestError::Config(e.to_string()))
    }

    /// Validate cross-field constraints. Tenant identity rules are enforced
    /// by the tenant registry when it resolves tenants.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.index_name.trim().is_empty() {
            return Err(IngestError::config("index_name must not be empty"));
        }
        if self.embedding.dimension == 0 {
            return Err(IngestError::config("embedding.dimension must be > 0"));
        }
        self.pipeline.validate().map_err(IngestError::Config)?;
        self.fragmentation
            .validate()
            .map_err(|e| IngestError::Config(format!("fragmentation: {}", e)))?;
        for tenant in &self.tenants {
            if !is_scope_segment(&tenant.id) {
                return Err(IngestError::Config(format!(
                    "tenant id '{}' must be non-empty and must not contain '{}'",
                    tenant.id, SCOPE_SEPARATOR
                )));
            }
            for source in &tenant.sources {
                if source.name.trim().is_empty() {
                    return Err(IngestError::Config(format!(
                        "tenant {} has a source with an empty name",
                        tenant.id
                    )));
                }
                if !is_scope_segment(&source.name) {
                    return Err(IngestError::Config(format!(
                        "tenant {}: source name '{}' must not contain '{}'",
                        tenant.id, source.name, SCOPE_SEPARATOR
                    )));
                }
            }
        }
        Ok(())
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    /// Expand ~ in index_path to the home directory
    pub fn expanded_index_path(&self) -> PathBuf {
        expand_home(&self.index_path)
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.index_name, "documents");
        assert_eq!(settings.embedding.provider, "hashing");
        assert_eq!(settings.embedding.dimension, 256);
        assert_eq!(settings.pipeline.max_in_flight, 4);
        assert!(settings.pipeline.tombstone_removed);
        assert!(settings.tenants.is_empty());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
index_name = "shared"

[embedding]
dimension = 64

[pipeline]
embed_workers = 3

[[tenants]]
id = "t1"
display_name = "Tenant One"

[tenants.overrides]
max_words = 50

[[tenants.sources]]
name = "docs"
root = "/srv/docs"
extensions = ["md", "txt"]
"#
        )
        .unwrap();

        let settings = Settings::load(Some(&file.path().to_string_lossy())).unwrap();
        assert_eq!(settings.index_name, "shared");
        assert_eq!(settings.embedding.dimension, 64);
        assert_eq!(settings.embedding.provider, "hashing");
        assert_eq!(settings.pipeline.embed_workers, 3);
        assert_eq!(settings.pipeline.publish_workers, 2);
        assert_eq!(settings.tenants.len(), 1);

        let tenant = &settings.tenants[0];
        assert_eq!(tenant.display_name.as_deref(), Some("Tenant One"));
        assert_eq!(tenant.overrides.max_words, Some(50));
        assert_eq!(tenant.sources[0].source_type, "filesystem");
        assert_eq!(tenant.sources[0].extensions, vec!["md", "txt"]);
    }

    #[test]
    fn test_missing_cli_file_is_error() {
        let result = Settings::load(Some("/nonexistent/ingest-config.toml"));
        assert!(matches!(result, Err(IngestError::Config(_))));
    }

    #[test]
    fn test_pipeline_validation() {
        let mut pipeline = PipelineSettings::default();
        assert!(pipeline.validate().is_ok());

        pipeline.max_in_flight = 0;
        assert!(pipeline.validate().is_err());

        pipeline.max_in_flight = 1;
        pipeline.initial_backoff_ms = 20_000;
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_identifiers_must_not_contain_separator() {
        let mut settings = Settings {
            tenants: vec![TenantSettings::new("acme")],
            ..Default::default()
        };
        assert!(settings.validate().is_ok());

        settings.tenants[0].sources.push(SourceSettings {
            source_type: "filesystem".to_string(),
            name: "fs/x".to_string(),
            root: "/srv/docs".to_string(),
            extensions: Vec::new(),
        });
        assert!(matches!(settings.validate(), Err(IngestError::Config(_))));

        settings.tenants[0].sources[0].name = "docs".to_string();
        settings.tenants[0].id = "acme/fs".to_string();
        assert!(matches!(settings.validate(), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_fragmentation_validation() {
        let mut frag = FragmentationSettings::default();
        assert!(frag.validate().is_ok());

        frag.overlap_words = frag.max_words;
        assert!(frag.validate().is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        let expanded = expand_home("~/state");
        assert!(expanded.ends_with("state"));
    }
}
