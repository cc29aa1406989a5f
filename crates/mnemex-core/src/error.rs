//! Crate-wide error taxonomy.
//!
//! Every component keeps its own narrow error enum (`StoreError`,
//! `VectorSearchError`, `SchedulerError`, ...) so unit tests can match on it
//! directly. `MnemexError` is the umbrella the orchestrator façade
//! returns to callers, with `#[from]` conversions from each component error.

use crate::dedup::DedupError;
use crate::ingest::IngestError;
use crate::resilience::PoolError;
use crate::search::VectorSearchError;
use crate::store::StoreError;

/// Result alias used throughout the crate's public surface.
pub type Result<T> = std::result::Result<T, MnemexError>;

/// The crate-wide error taxonomy (see module docs above).
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MnemexError {
    /// Content too large, malformed options, unknown ordering.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// `id` does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency failure on `update`.
    #[error("stale write on {id}: expected version {expected}, found {found}")]
    StaleWrite {
        id: String,
        expected: u64,
        found: u64,
    },

    /// Record file failed to parse; the file has been quarantined.
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    /// Ingestion backpressure; caller should back off.
    #[error("ingest queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Embedding circuit open and the caller insisted on semantic mode.
    #[error("embedding model unavailable (circuit open)")]
    EmbeddingUnavailable,

    /// Extraction/classification circuit open; transcript deferred.
    #[error("language model unavailable (circuit open), transcript deferred")]
    ModelUnavailable,

    /// Underlying I/O failure in the store or relational layer.
    #[error("store error: {0}")]
    StoreError(#[from] StoreError),

    /// Vector index failure.
    #[error("vector search error: {0}")]
    VectorSearch(#[from] VectorSearchError),

    /// Connection pool exhaustion or acquire timeout.
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// Dedup/contradiction pipeline failure.
    #[error("dedup error: {0}")]
    Dedup(#[from] DedupError),

    /// Ingestion pipeline failure.
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Startup `PRAGMA integrity_check` failed; process refuses to serve.
    #[error("integrity check failed: {0}")]
    IntegrityFailure(String),
}
