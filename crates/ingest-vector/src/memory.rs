//! In-process vector index.
//!
//! Exact brute-force search over a map per index. Used by tests and by
//! short-lived runs that do not need persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::error::VectorError;
use crate::index::{check_dimensions, top_k, VectorIndex};
use crate::point::{cosine_similarity, IndexPoint, PayloadFilter, ScoredPoint};

struct Collection {
    dimension: usize,
    points: BTreeMap<String, IndexPoint>,
}

/// Vector index held entirely in memory.
#[derive(Default)]
pub struct MemoryIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

fn poisoned<T>(_: PoisonError<T>) -> VectorError {
    VectorError::Index("index lock poisoned".to_string())
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// All points of an index, ordered by id.
    pub fn points(&self, name: &str) -> Result<Vec<IndexPoint>, VectorError> {
        let collections = self.collections.read().map_err(poisoned)?;
        let collection = collections
            .get(name)
            .ok_or_else(|| VectorError::IndexNotFound(name.to_string()))?;
        Ok(collection.points.values().cloned().collect())
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_index(&self, name: &str, dimension: usize) -> Result<(), VectorError> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        match collections.get(name) {
            Some(existing) if existing.dimension != dimension => {
                Err(VectorError::DimensionMismatch {
                    expected: existing.dimension,
                    actual: dimension,
                })
            }
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    name.to_string(),
                    Collection {
                        dimension,
                        points: BTreeMap::new(),
                    },
                );
                debug!(index = %name, dimension, "Created in-memory index");
                Ok(())
            }
        }
    }

    async fn upsert(&self, name: &str, points: Vec<IndexPoint>) -> Result<(), VectorError> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| VectorError::IndexNotFound(name.to_string()))?;

        check_dimensions(&points, collection.dimension)?;
        for point in points {
            collection.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn delete(&self, name: &str, ids: &[String]) -> Result<usize, VectorError> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| VectorError::IndexNotFound(name.to_string()))?;

        Ok(ids
            .iter()
            .filter(|id| collection.points.remove(id.as_str()).is_some())
            .count())
    }

    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        filter: &PayloadFilter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, VectorError> {
        let collections = self.collections.read().map_err(poisoned)?;
        let collection = collections
            .get(name)
            .ok_or_else(|| VectorError::IndexNotFound(name.to_string()))?;

        if vector.len() != collection.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: collection.dimension,
                actual: vector.len(),
            });
        }

        let hits = collection
            .points
            .values()
            .filter(|p| filter.matches(&p.payload))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        Ok(top_k(hits, limit))
    }

    async fn count(&self, name: &str, filter: &PayloadFilter) -> Result<usize, VectorError> {
        let collections = self.collections.read().map_err(poisoned)?;
        let collection = collections
            .get(name)
            .ok_or_else(|| VectorError::IndexNotFound(name.to_string()))?;
        Ok(collection
            .points
            .values()
            .filter(|p| filter.matches(&p.payload))
            .count())
    }

    async fn get(&self, name: &str, id: &str) -> Result<Option<IndexPoint>, VectorError> {
        let collections = self.collections.read().map_err(poisoned)?;
        let collection = collections
            .get(name)
            .ok_or_else(|| VectorError::IndexNotFound(name.to_string()))?;
        Ok(collection.points.get(id).cloned())
    }
}
