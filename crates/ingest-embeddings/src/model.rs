//! Embedding provider trait and types.

use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Vector embedding - a normalized float array.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// The embedding vector (normalized to unit length)
    pub values: Vec<f32>,
}

impl Embedding {
    /// Create a new embedding from a vector.
    /// Normalizes the vector to unit length.
    pub fn new(values: Vec<f32>) -> Self {
        let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let normalized = if norm > 0.0 {
            values.iter().map(|x| x / norm).collect()
        } else {
            values
        };
        Self { values: normalized }
    }

    /// Create embedding without normalization (for pre-normalized vectors)
    pub fn from_normalized(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Get the embedding dimension
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

/// Remote or local service turning text into vectors.
///
/// Implementations must be thread-safe; the pipeline calls them from many
/// workers concurrently, bounded by its own in-flight limit.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the embedding configuration; stored with every vector
    fn model_id(&self) -> &str;

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Embed a batch; the result has one embedding per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError>;

    /// Verify the provider is reachable and answers with the declared dimension.
    async fn health_check(&self) -> Result<(), EmbeddingError> {
        let sample = vec!["health check".to_string()];
        let embeddings = self.embed(&sample).await?;
        match embeddings.first() {
            Some(e) if e.dimension() == self.dimension() => Ok(()),
            Some(e) => Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension(),
                actual: e.dimension(),
            }),
            None => Err(EmbeddingError::InvalidResponse(
                "empty response to health check".to_string(),
            )),
        }
    }
}
