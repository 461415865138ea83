//! Vector index trait.

use async_trait::async_trait;

use crate::error::VectorError;
use crate::point::{IndexPoint, PayloadFilter, ScoredPoint};

/// External vector index with payload filtering.
///
/// One physical index is shared by all tenants; tenant isolation relies on
/// the `tenant_id` payload field and on callers always filtering by it.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the index if missing. Fails if it exists with another dimension.
    async fn ensure_index(&self, name: &str, dimension: usize) -> Result<(), VectorError>;

    /// Insert or replace points. All points are written or none are.
    async fn upsert(&self, name: &str, points: Vec<IndexPoint>) -> Result<(), VectorError>;

    /// Delete points by id; unknown ids are ignored. Returns how many existed.
    async fn delete(&self, name: &str, ids: &[String]) -> Result<usize, VectorError>;

    /// Nearest points to `vector` among those matching `filter`, best first.
    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        filter: &PayloadFilter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, VectorError>;

    /// Number of points matching `filter`.
    async fn count(&self, name: &str, filter: &PayloadFilter) -> Result<usize, VectorError>;

    /// Fetch one point by id.
    async fn get(&self, name: &str, id: &str) -> Result<Option<IndexPoint>, VectorError>;

    /// Verify the index backend is reachable.
    async fn health_check(&self) -> Result<(), VectorError> {
        Ok(())
    }
}

/// Check every point against the index dimension before writing any.
pub(crate) fn check_dimensions(points: &[IndexPoint], dimension: usize) -> Result<(), VectorError> {
    for point in points {
        if point.vector.len() != dimension {
            return Err(VectorError::DimensionMismatch {
                expected: dimension,
                actual: point.vector.len(),
            });
        }
    }
    Ok(())
}

/// Rank candidates by cosine similarity and keep the best `limit`.
pub(crate) fn top_k(mut hits: Vec<ScoredPoint>, limit: usize) -> Vec<ScoredPoint> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(limit);
    hits
}
