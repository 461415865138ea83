//! API-based embedder using OpenAI-compatible endpoints.
//!
//! Makes exactly one request per call. Retries belong to the caller, which
//! uses [`EmbeddingError::is_transient`] to decide.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EmbeddingError;
use crate::model::{Embedding, EmbeddingProvider};

/// Configuration for the API embedder.
#[derive(Debug, Clone)]
pub struct ApiEmbedderConfig {
    /// API base URL (e.g., "https://api.openai.com/v1")
    pub base_url: String,

    /// Model to use (e.g., "text-embedding-3-small")
    pub model: String,

    /// Requested vector dimension
    pub dimension: usize,

    /// API key
    pub api_key: SecretString,

    /// Request timeout
    pub timeout: Duration,
}

impl ApiEmbedderConfig {
    /// Create config for the OpenAI API.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
            dimension,
            api_key: SecretString::from(api_key.into()),
            timeout: Duration::from_secs(30),
        }
    }

    /// Point the config at a different OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Map an HTTP status to the error taxonomy.
fn classify_status(status: StatusCode, body: String) -> EmbeddingError {
    let detail = format!("HTTP {}: {}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        EmbeddingError::RateLimited
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        EmbeddingError::Timeout
    } else if status.is_server_error() {
        EmbeddingError::Transient(detail)
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        EmbeddingError::Auth(detail)
    } else {
        EmbeddingError::Fatal(detail)
    }
}

fn classify_transport(err: reqwest::Error) -> EmbeddingError {
    if err.is_timeout() {
        EmbeddingError::Timeout
    } else if err.is_connect() || err.is_request() {
        EmbeddingError::Transient(err.to_string())
    } else {
        EmbeddingError::Fatal(err.to_string())
    }
}

/// Embedding provider for OpenAI-compatible `/embeddings` endpoints.
pub struct ApiEmbedder {
    client: Client,
    config: ApiEmbedderConfig,
    model_id: String,
}

impl ApiEmbedder {
    pub fn new(config: ApiEmbedderConfig) -> Result<Self, EmbeddingError> {
        if config.dimension == 0 {
            return Err(EmbeddingError::Config("dimension must be > 0".to_string()));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmbeddingError::Config(e.to_string()))?;

        let model_id = format!("openai/{}/{}", config.model, config.dimension);
        Ok(Self {
            client,
            config,
            model_id,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for ApiEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingsRequest {
            model: &self.config.model,
            input: texts,
            dimensions: self.config.dimension,
        };
        let url = format!("{}/embeddings", self.config.base_url);

        debug!(count = texts.len(), model = %self.config.model, "Calling embeddings API");

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.config.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let mut body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if body.data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.data.len()
            )));
        }

        body.data.sort_by_key(|d| d.index);
        body.data
            .into_iter()
            .map(|d| {
                if d.embedding.len() != self.config.dimension {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: self.config.dimension,
                        actual: d.embedding.len(),
                    });
                }
                Ok(Embedding::new(d.embedding))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            EmbeddingError::RateLimited
        ));
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(classify_status(StatusCode::GATEWAY_TIMEOUT, String::new()).is_transient());
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, String::new()),
            EmbeddingError::Auth(_)
        ));
        assert!(!classify_status(StatusCode::BAD_REQUEST, "bad input".into()).is_transient());
    }

    #[test]
    fn test_config_builders() {
        let config = ApiEmbedderConfig::openai("sk-test", "text-embedding-3-small", 256)
            .with_base_url("http://localhost:8080/v1/")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert_eq!(config.timeout, Duration::from_secs(5));

        let embedder = ApiEmbedder::new(config).unwrap();
        assert_eq!(embedder.model_id(), "openai/text-embedding-3-small/256");
        assert_eq!(embedder.dimension(), 256);
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{"data":[{"embedding":[0.0,1.0],"index":1},{"embedding":[1.0,0.0],"index":0}]}"#;
        let mut body: EmbeddingsResponse = serde_json::from_str(json).unwrap();
        body.data.sort_by_key(|d| d.index);
        assert_eq!(body.data[0].embedding, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_request() {
        let config = ApiEmbedderConfig::openai("sk-test", "m", 8)
            .with_base_url("http://127.0.0.1:9");
        let embedder = ApiEmbedder::new(config).unwrap();
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
    }
}
