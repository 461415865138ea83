//! RocksDB-backed local vector index.
//!
//! Points are stored as JSON under `{index}\0{point_id}` in one column
//! family; index dimensions live in another. Upserts and deletes go through
//! a single `WriteBatch`, so a batch is applied entirely or not at all.
//! Queries are exact brute-force scans over the index prefix.

use std::path::Path;

use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info};

use crate::error::VectorError;
use crate::index::{check_dimensions, top_k, VectorIndex};
use crate::point::{cosine_similarity, IndexPoint, PayloadFilter, ScoredPoint};

/// Column family for point records
pub const CF_POINTS: &str = "points";

/// Column family for index definitions
pub const CF_INDEXES: &str = "indexes";

fn point_key(index: &str, id: &str) -> Vec<u8> {
    format!("{}\0{}", index, id).into_bytes()
}

fn index_prefix(index: &str) -> Vec<u8> {
    format!("{}\0", index).into_bytes()
}

/// Persistent vector index for single-node deployments.
pub struct RocksIndex {
    db: DB,
}

impl RocksIndex {
    /// Open or create the index database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VectorError> {
        let path = path.as_ref();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_POINTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_INDEXES, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        info!(path = ?path, "Opened vector index storage");
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, VectorError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| VectorError::Index(format!("column family missing: {}", name)))
    }

    fn dimension_of(&self, index: &str) -> Result<Option<usize>, VectorError> {
        match self.db.get_cf(self.cf(CF_INDEXES)?, index.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn require_dimension(&self, index: &str) -> Result<usize, VectorError> {
        self.dimension_of(index)?
            .ok_or_else(|| VectorError::IndexNotFound(index.to_string()))
    }

    /// Visit every point of an index matching the filter.
    fn scan<F>(&self, index: &str, filter: &PayloadFilter, mut visit: F) -> Result<(), VectorError>
    where
        F: FnMut(IndexPoint),
    {
        let prefix = index_prefix(index);
        let iter = self.db.iterator_cf(
            self.cf(CF_POINTS)?,
            IteratorMode::From(&prefix, Direction::Forward),
        );
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let point: IndexPoint = serde_json::from_slice(&value)?;
            if filter.matches(&point.payload) {
                visit(point);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for RocksIndex {
    async fn ensure_index(&self, name: &str, dimension: usize) -> Result<(), VectorError> {
        match self.dimension_of(name)? {
            Some(existing) if existing != dimension => Err(VectorError::DimensionMismatch {
                expected: existing,
                actual: dimension,
            }),
            Some(_) => Ok(()),
            None => {
                self.db.put_cf(
                    self.cf(CF_INDEXES)?,
                    name.as_bytes(),
                    serde_json::to_vec(&dimension)?,
                )?;
                info!(index = %name, dimension, "Created vector index");
                Ok(())
            }
        }
    }

    async fn upsert(&self, name: &str, points: Vec<IndexPoint>) -> Result<(), VectorError> {
        let dimension = self.require_dimension(name)?;
        check_dimensions(&points, dimension)?;

        let cf = self.cf(CF_POINTS)?;
        let mut batch = WriteBatch::default();
        for point in &points {
            batch.put_cf(cf, point_key(name, &point.id), serde_json::to_vec(point)?);
        }
        self.db.write(batch)?;

        debug!(index = %name, count = points.len(), "Upserted points");
        Ok(())
    }

    async fn delete(&self, name: &str, ids: &[String]) -> Result<usize, VectorError> {
        self.require_dimension(name)?;

        let cf = self.cf(CF_POINTS)?;
        let mut batch = WriteBatch::default();
        let mut existing = 0;
        for id in ids {
            let key = point_key(name, id);
            if self.db.get_pinned_cf(cf, &key)?.is_some() {
                existing += 1;
            }
            batch.delete_cf(cf, key);
        }
        self.db.write(batch)?;

        debug!(index = %name, requested = ids.len(), existing, "Deleted points");
        Ok(existing)
    }

    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        filter: &PayloadFilter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, VectorError> {
        let dimension = self.require_dimension(name)?;
        if vector.len() != dimension {
            return Err(VectorError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }

        let mut hits = Vec::new();
        self.scan(name, filter, |point| {
            hits.push(ScoredPoint {
                score: cosine_similarity(vector, &point.vector),
                id: point.id,
                payload: point.payload,
            });
        })?;
        Ok(top_k(hits, limit))
    }

    async fn count(&self, name: &str, filter: &PayloadFilter) -> Result<usize, VectorError> {
        self.require_dimension(name)?;
        let mut count = 0;
        self.scan(name, filter, |_| count += 1)?;
        Ok(count)
    }

    async fn get(&self, name: &str, id: &str) -> Result<Option<IndexPoint>, VectorError> {
        self.require_dimension(name)?;
        match self.db.get_cf(self.cf(CF_POINTS)?, point_key(name, id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::fields;
    use tempfile::TempDir;

    fn open() -> (RocksIndex, TempDir) {
        let dir = TempDir::new().unwrap();
        let index = RocksIndex::open(dir.path()).unwrap();
        (index, dir)
    }

    #[tokio::test]
    async fn test_roundtrip_and_query() {
        let (index, _dir) = open();
        index.ensure_index("docs", 2).await.unwrap();

        index
            .upsert(
                "docs",
                vec![
                    IndexPoint::new("t1/fs/docs/A#0", vec![1.0, 0.0])
                        .with_payload(fields::TENANT_ID, "t1"),
                    IndexPoint::new("t2/fs/docs/A#0", vec![1.0, 0.0])
                        .with_payload(fields::TENANT_ID, "t2"),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .query("docs", &[1.0, 0.0], &PayloadFilter::tenant("t2"), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "t2/fs/docs/A#0");

        let removed = index
            .delete("docs", &["t1/fs/docs/A#0".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.count("docs", &PayloadFilter::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let index = RocksIndex::open(dir.path()).unwrap();
            index.ensure_index("docs", 1).await.unwrap();
            index
                .upsert("docs", vec![IndexPoint::new("p", vec![1.0])])
                .await
                .unwrap();
        }
        let index = RocksIndex::open(dir.path()).unwrap();
        assert!(index.get("docs", "p").await.unwrap().is_some());
        assert!(index.ensure_index("docs", 4).await.is_err());
    }

    #[tokio::test]
    async fn test_indexes_do_not_share_points() {
        let (index, _dir) = open();
        index.ensure_index("a", 1).await.unwrap();
        index.ensure_index("ab", 1).await.unwrap();
        index
            .upsert("ab", vec![IndexPoint::new("p", vec![1.0])])
            .await
            .unwrap();
        assert_eq!(index.count("a", &PayloadFilter::new()).await.unwrap(), 0);
    }
}
