//! Deterministic local embedder.
//!
//! Feature hashing over lowercased word tokens: each token is hashed with
//! SHA-256, the first bytes pick a bucket and a sign. The result depends only
//! on the text, so it is stable across processes and machines. Used for
//! offline runs and tests; it carries no semantics beyond shared vocabulary.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::EmbeddingError;
use crate::model::{Embedding, EmbeddingProvider};

/// Feature-hashing embedding provider.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::Config("dimension must be > 0".to_string()));
        }
        Ok(Self {
            dimension,
            model_id: format!("hashing-v1/{}", dimension),
        })
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Embedding {
        let mut values = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            values[bucket] += sign;
        }
        Embedding::new(values)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
