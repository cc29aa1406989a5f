//! The embedding cache and the vendor-agnostic model boundary it sits
//! behind.

mod cache;
#[cfg(feature = "embeddings")]
mod fastembed_adapter;
mod model;

pub use cache::EmbeddingCache;
#[cfg(feature = "embeddings")]
pub use fastembed_adapter::{FastembedModelAdapter, FASTEMBED_DIMENSIONS};
pub use model::{l2_normalize, DeterministicEmbeddingModel, EmbeddingModel, ModelError};
