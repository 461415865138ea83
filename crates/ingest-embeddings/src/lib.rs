//! # ingest-embeddings
//!
//! Embedding providers for the ingestion engine.
//!
//! ## Providers
//! - `hashing`: deterministic local feature hashing, no network
//! - `openai`: any OpenAI-compatible `/embeddings` endpoint
//!
//! Providers never retry; the vectorization stage owns retry policy and
//! classifies failures with [`EmbeddingError::is_transient`].

pub mod api;
pub mod error;
pub mod hashing;
pub mod model;

use std::sync::Arc;
use std::time::Duration;

use ingest_types::EmbeddingSettings;

pub use api::{ApiEmbedder, ApiEmbedderConfig};
pub use error::EmbeddingError;
pub use hashing::HashEmbedder;
pub use model::{Embedding, EmbeddingProvider};

/// Build the provider named in the settings.
pub fn create_provider(
    settings: &EmbeddingSettings,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match settings.provider.as_str() {
        "hashing" => Ok(Arc::new(HashEmbedder::new(settings.dimension)?)),
        "openai" => {
            let api_key = settings.api_key.clone().ok_or_else(|| {
                EmbeddingError::Config(
                    "embedding.api_key is required for the openai provider".to_string(),
                )
            })?;
            let mut config =
                ApiEmbedderConfig::openai(api_key, &settings.model, settings.dimension)
                    .with_timeout(Duration::from_secs(settings.timeout_secs));
            if let Some(url) = &settings.base_url {
                config = config.with_base_url(url);
            }
            Ok(Arc::new(ApiEmbedder::new(config)?))
        }
        other => Err(EmbeddingError::Config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}
