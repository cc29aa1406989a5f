//! A flat, sharded inner-product index over unit vectors.
//!
//! At the target scale (≤ 10^5 records) a flat scan beats a graph index on
//! simplicity without costing real recall: there is no approximate/exact
//! trade-off to reason about elsewhere in the pipeline. The index mirrors
//! the embedding cache — losing it is never data loss, only a rebuild.
//! Sharding by hash of id bounds write contention: an insert only takes
//! the writer lock of the shard its id hashes into, so concurrent inserts
//! into different shards don't serialize.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, thiserror::Error)]
pub enum VectorSearchError {
    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

struct Shard {
    vectors: HashMap<String, Vec<f32>>,
}

/// Sharded flat index. `search` takes each shard's reader lock in turn, so
/// a long-running insert into one shard never blocks a search scanning
/// the others.
pub struct VectorIndex {
    dimensions: usize,
    shards: Vec<RwLock<Shard>>,
}

fn shard_index(id: &str, shard_count: usize) -> usize {
    let digest = crate::hashing::content_hash(id);
    u64::from_str_radix(&digest[..16], 16).unwrap_or(0) as usize % shard_count
}

impl VectorIndex {
    pub fn new(dimensions: usize, shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| {
                RwLock::new(Shard {
                    vectors: HashMap::new(),
                })
            })
            .collect();
        Self { dimensions, shards }
    }

    pub fn insert(&self, id: &str, vector: Vec<f32>) -> Result<(), VectorSearchError> {
        if vector.len() != self.dimensions {
            return Err(VectorSearchError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        let idx = shard_index(id, self.shards.len());
        self.shards[idx]
            .write()
            .unwrap()
            .vectors
            .insert(id.to_string(), vector);
        Ok(())
    }

    pub fn remove(&self, id: &str) {
        let idx = shard_index(id, self.shards.len());
        self.shards[idx].write().unwrap().vectors.remove(id);
    }

    /// Top-k by inner product (== cosine similarity, since vectors are
    /// unit length). `filter` is applied after scoring — it
    /// must not change the relative order of retained candidates, only
    /// drop some.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: impl Fn(&str) -> bool,
    ) -> Result<Vec<(String, f32)>, VectorSearchError> {
        if query.len() != self.dimensions {
            return Err(VectorSearchError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        let mut scored = Vec::new();
        for shard in &self.shards {
            let guard = shard.read().unwrap();
            for (id, vector) in guard.vectors.iter() {
                if !filter(id) {
                    continue;
                }
                scored.push((id.clone(), inner_product(query, vector)));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().unwrap().vectors.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[inline]
fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(v: Vec<f32>) -> Vec<f32> {
        let mut v = v;
        crate::embeddings::l2_normalize(&mut v);
        v
    }

    #[test]
    fn search_ranks_closest_vector_first() {
        let index = VectorIndex::new(3, 4);
        index.insert("a", unit(vec![1.0, 0.0, 0.0])).unwrap();
        index.insert("b", unit(vec![0.0, 1.0, 0.0])).unwrap();
        index.insert("c", unit(vec![0.9, 0.1, 0.0])).unwrap();
        let results = index.search(&unit(vec![1.0, 0.0, 0.0]), 2, |_| true).unwrap();
        assert_eq!(results[0].0, "a");
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn filter_drops_candidates_without_reordering_survivors() {
        let index = VectorIndex::new(3, 4);
        index.insert("a", unit(vec![1.0, 0.0, 0.0])).unwrap();
        index.insert("b", unit(vec![0.99, 0.01, 0.0])).unwrap();
        let results = index
            .search(&unit(vec![1.0, 0.0, 0.0]), 5, |id| id != "a")
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "b");
    }

    #[test]
    fn remove_excludes_from_future_searches() {
        let index = VectorIndex::new(3, 4);
        index.insert("a", unit(vec![1.0, 0.0, 0.0])).unwrap();
        index.remove("a");
        let results = index.search(&unit(vec![1.0, 0.0, 0.0]), 5, |_| true).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let index = VectorIndex::new(3, 4);
        let err = index.insert("a", vec![1.0, 0.0]).unwrap_err();
        assert!(matches!(err, VectorSearchError::DimensionMismatch { .. }));
    }
}
