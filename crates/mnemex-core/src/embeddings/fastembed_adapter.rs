//! Concrete `EmbeddingModel` backed by local ONNX inference via fastembed.
//!
//! Grounded directly in the global-model pattern: a process-wide
//! `OnceLock<Result<Mutex<TextEmbedding>, String>>` so model weights are
//! downloaded and loaded exactly once regardless of how many `Store`s or
//! test fixtures construct an adapter.

use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use fastembed::{EmbeddingModel as FastembedModel, InitOptions, TextEmbedding};

use super::model::{l2_normalize, EmbeddingModel, ModelError};

/// Output dimensionality after Matryoshka truncation. 384 keeps the vector
/// index's per-shard storage small while MTEB quality loss stays under 3%.
pub const FASTEMBED_DIMENSIONS: usize = 384;

const MAX_TEXT_LENGTH: usize = 8192;
const BATCH_SIZE: usize = 32;

static MODEL: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("MNEMEX_FASTEMBED_CACHE") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "mnemex", "mnemex") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn get_model() -> Result<MutexGuard<'static, TextEmbedding>, ModelError> {
    let result = MODEL.get_or_init(|| {
        let cache_dir = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            tracing::warn!(error = %e, path = ?cache_dir, "failed to create fastembed cache dir");
        }
        let options = InitOptions::new(FastembedModel::NomicEmbedTextV15)
            .with_show_download_progress(false)
            .with_cache_dir(cache_dir);
        TextEmbedding::try_new(options)
            .map(Mutex::new)
            .map_err(|e| e.to_string())
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| ModelError::Unavailable(format!("embedding model lock poisoned: {e}"))),
        Err(err) => Err(ModelError::Unavailable(err.clone())),
    }
}

fn matryoshka_truncate(mut vector: Vec<f32>) -> Vec<f32> {
    vector.truncate(FASTEMBED_DIMENSIONS);
    l2_normalize(&mut vector);
    vector
}

/// Local fastembed-backed adapter. Construct once and share behind an `Arc`.
pub struct FastembedModelAdapter;

impl FastembedModelAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FastembedModelAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingModel for FastembedModelAdapter {
    fn embed_batch(
        &self,
        texts: &[String],
        _deadline: Duration,
    ) -> Result<Vec<Vec<f32>>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut model = get_model()?;
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            let truncated: Vec<&str> = chunk
                .iter()
                .map(|t| {
                    if t.len() > MAX_TEXT_LENGTH {
                        &t[..MAX_TEXT_LENGTH]
                    } else {
                        t.as_str()
                    }
                })
                .collect();
            let embeddings = model
                .embed(truncated, None)
                .map_err(|e| ModelError::Unavailable(e.to_string()))?;
            out.extend(embeddings.into_iter().map(matryoshka_truncate));
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        FASTEMBED_DIMENSIONS
    }

    fn name(&self) -> &'static str {
        "fastembed/nomic-embed-text-v1.5"
    }
}
