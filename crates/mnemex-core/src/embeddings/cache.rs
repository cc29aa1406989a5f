//! The embedding cache. The only component permitted to call the
//! external embedding model; everything else reads vectors out of here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::hashing::content_hash;
use crate::resilience::CircuitBreaker;

use super::model::{EmbeddingModel, ModelError};

#[derive(Debug, Clone)]
struct CacheEntry {
    vector: Vec<f32>,
    model_tag: &'static str,
}

/// Maps content-hash to a unit-length vector, computing on miss through a
/// circuit breaker. Misses for the same hash from concurrent callers are
/// single-flighted: only one of them calls the model, the rest wait for
/// and reuse its result.
pub struct EmbeddingCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    model: Arc<dyn EmbeddingModel>,
    circuit: Arc<CircuitBreaker>,
    deadline: Duration,
}

impl EmbeddingCache {
    pub fn new(model: Arc<dyn EmbeddingModel>, circuit: Arc<CircuitBreaker>, deadline: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            model,
            circuit,
            deadline,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.model.dimensions()
    }

    /// Direct lookup, no model call on miss.
    pub fn get(&self, hash: &str) -> Option<Vec<f32>> {
        self.entries.read().unwrap().get(hash).map(|e| e.vector.clone())
    }

    /// Insert a precomputed vector (used when rebuilding from the store,
    /// or after `bulk_precompute`/`get_or_compute` has already run the
    /// model).
    pub fn put(&self, hash: &str, vector: Vec<f32>) {
        self.entries.write().unwrap().insert(
            hash.to_string(),
            CacheEntry {
                vector,
                model_tag: self.model.name(),
            },
        );
    }

    /// Look up by content, computing and caching on miss. Leader/joiner
    /// single-flight keyed on content-hash: the leader runs the model
    /// call and populates the cache, joiners block on the same key's lock
    /// and then read the now-populated entry.
    pub fn get_or_compute(&self, content: &str) -> Result<Vec<f32>, ModelError> {
        let hash = content_hash(content);
        if let Some(vector) = self.get(&hash) {
            return Ok(vector);
        }

        let key_lock = {
            let mut in_flight = self.in_flight.lock().unwrap();
            in_flight
                .entry(hash.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = key_lock.lock().unwrap();

        if let Some(vector) = self.get(&hash) {
            self.in_flight.lock().unwrap().remove(&hash);
            return Ok(vector);
        }

        let texts = vec![content.to_string()];
        let model = Arc::clone(&self.model);
        let deadline = self.deadline;
        let last_error: Arc<Mutex<Option<ModelError>>> = Arc::new(Mutex::new(None));
        let last_error_for_call = Arc::clone(&last_error);
        let result: Result<Vec<Vec<f32>>, ModelError> = self.circuit.call(
            move || match model.embed_batch(&texts, deadline) {
                Ok(vectors) => Ok(Ok(vectors)),
                Err(e) => {
                    *last_error_for_call.lock().unwrap() = Some(e);
                    Err(())
                }
            },
            move || {
                Err(last_error
                    .lock()
                    .unwrap()
                    .take()
                    .unwrap_or_else(|| ModelError::Unavailable("circuit open".into())))
            },
        );

        self.in_flight.lock().unwrap().remove(&hash);

        match result {
            Ok(mut vectors) => {
                let vector = vectors.pop().ok_or_else(|| {
                    ModelError::Unavailable("model returned no vector".to_string())
                })?;
                self.put(&hash, vector.clone());
                Ok(vector)
            }
            Err(e) => Err(e),
        }
    }

    /// Batch precompute: the only ingress used by the nightly precompute
    /// job. Chunks `texts` by `batch_size`, skipping anything
    /// already cached.
    pub fn bulk_precompute(
        &self,
        texts: &[String],
        batch_size: usize,
    ) -> HashMap<String, Vec<f32>> {
        let mut out = HashMap::new();
        let mut pending_hashes = Vec::new();
        let mut pending_texts = Vec::new();

        for text in texts {
            let hash = content_hash(text);
            if let Some(vector) = self.get(&hash) {
                out.insert(hash, vector);
            } else {
                pending_hashes.push(hash);
                pending_texts.push(text.clone());
            }
        }

        for (hash_chunk, text_chunk) in pending_hashes
            .chunks(batch_size.max(1))
            .zip(pending_texts.chunks(batch_size.max(1)))
        {
            let model = Arc::clone(&self.model);
            let deadline = self.deadline;
            let chunk = text_chunk.to_vec();
            let result = self.circuit.call(
                move || model.embed_batch(&chunk, deadline).map_err(|_| ()),
                Vec::new,
            );
            for (hash, vector) in hash_chunk.iter().zip(result.into_iter()) {
                self.put(hash, vector.clone());
                out.insert(hash.clone(), vector);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::model::DeterministicEmbeddingModel;

    fn cache() -> EmbeddingCache {
        let model = Arc::new(DeterministicEmbeddingModel::new(16));
        let circuit = Arc::new(CircuitBreaker::new("test-embed", 5, Duration::from_secs(600)));
        EmbeddingCache::new(model, circuit, Duration::from_secs(1))
    }

    #[test]
    fn get_or_compute_populates_the_cache() {
        let cache = cache();
        let hash = content_hash("dark mode");
        assert!(cache.get(&hash).is_none());
        let vector = cache.get_or_compute("dark mode").unwrap();
        assert_eq!(cache.get(&hash).unwrap(), vector);
    }

    #[test]
    fn bulk_precompute_skips_already_cached_entries() {
        let cache = cache();
        cache.get_or_compute("first").unwrap();
        let out = cache.bulk_precompute(
            &["first".to_string(), "second".to_string()],
            100,
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn open_circuit_surfaces_unavailable() {
        let model = Arc::new(DeterministicEmbeddingModel::new(8));
        let circuit = Arc::new(CircuitBreaker::new("test-embed", 1, Duration::from_secs(600)));
        circuit.call::<()>(|| Err(()), || ());
        let cache = EmbeddingCache::new(model, circuit, Duration::from_secs(1));
        let err = cache.get_or_compute("anything").unwrap_err();
        assert!(matches!(err, ModelError::Unavailable(_)));
    }
}
