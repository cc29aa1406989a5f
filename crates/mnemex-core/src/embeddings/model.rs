//! The vendor boundary: everything above this trait is vendor
//! agnostic, everything below it is a specific model.

use std::time::Duration;

/// Failure modes a model adapter can report. The resilience layer wraps
/// these behind a circuit breaker — a run of `Timeout`/`Unavailable` trips
/// it, `InvalidInput` never does (it's a caller bug, not a model outage).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("embedding model unavailable: {0}")]
    Unavailable(String),

    #[error("embedding request exceeded deadline")]
    Timeout,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// A pluggable source of dense text embeddings.
///
/// Implementations must return L2-normalized vectors of a fixed
/// dimensionality so cosine similarity reduces to a dot product in the
/// vector index.
pub trait EmbeddingModel: Send + Sync {
    /// Embed a batch of texts, giving up after `deadline`.
    fn embed_batch(&self, texts: &[String], deadline: Duration) -> Result<Vec<Vec<f32>>, ModelError>;

    /// The fixed output dimensionality this adapter produces.
    fn dimensions(&self) -> usize;

    /// Human-readable identifier, used in `tracing` fields and diagnostics.
    fn name(&self) -> &'static str;
}

/// L2-normalize `vector` in place.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// A deterministic, dependency-free adapter: hashes each token into a fixed
/// `dimensions`-wide vector and L2-normalizes. Not semantically meaningful,
/// but stable and instant — used in tests and whenever the `embeddings`
/// feature (the real fastembed-backed adapter) is disabled, so the rest of
/// the pipeline (cache, vector index, hybrid ranker) always has something
/// to embed against.
pub struct DeterministicEmbeddingModel {
    dimensions: usize,
}

impl DeterministicEmbeddingModel {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.split_whitespace() {
            let hash = crate::hashing::content_hash(token);
            for (i, byte) in hash.as_bytes().iter().enumerate() {
                let idx = (i + *byte as usize) % self.dimensions;
                vector[idx] += (*byte as f32 - 128.0) / 128.0;
            }
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl EmbeddingModel for DeterministicEmbeddingModel {
    fn embed_batch(&self, texts: &[String], _deadline: Duration) -> Result<Vec<Vec<f32>>, ModelError> {
        if texts.iter().any(|t| t.is_empty()) {
            return Err(ModelError::InvalidInput("text cannot be empty".into()));
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &'static str {
        "deterministic-reference"
    }
}
