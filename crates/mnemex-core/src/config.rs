//! Single configuration struct threaded into the orchestrator at construction.
//!
//! Every numeric default used anywhere in the crate lives here exactly once;
//! no component re-declares its own copy of a threshold. Overrides are parsed
//! from environment/config file in one place by the caller and handed down as
//! a `Config` value — there is no global mutable config state.

use std::time::Duration;

/// BM25 tuning.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Config {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Hybrid ranker fusion weights and cache policy.
#[derive(Debug, Clone, Copy)]
pub struct HybridConfig {
    pub semantic_weight: f32,
    pub lexical_weight: f32,
    pub recency_weight: f32,
    pub salience_weight: f32,
    /// τ in `recency = exp(-Δdays / τ)`.
    pub recency_tau_days: f64,
    /// Candidate pool size multiplier (4·k from each of the vector and lexical indexes).
    pub pool_multiplier: usize,
    pub cache_ttl: Duration,
    /// Number of vector index shards.
    pub vector_shards: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.5,
            lexical_weight: 0.2,
            recency_weight: 0.2,
            salience_weight: 0.1,
            recency_tau_days: 30.0,
            pool_multiplier: 4,
            cache_ttl: Duration::from_secs(24 * 3600),
            vector_shards: 16,
        }
    }
}

/// FSRS-style scheduler constants.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub max_stability: f64,
    pub max_interval_days: f64,
    pub promotion_stability_threshold: f64,
    pub promotion_review_threshold: u32,
    pub promotion_project_threshold: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_stability: 10.0,
            max_interval_days: 365.0,
            promotion_stability_threshold: 2.0,
            promotion_review_threshold: 2,
            promotion_project_threshold: 2,
        }
    }
}

/// Dedup/contradiction filter thresholds.
#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    pub near_textual_jaccard: f64,
    pub semantic_duplicate: f32,
    pub semantic_gray_zone_low: f32,
    pub semantic_gray_zone_high: f32,
    pub degraded_update_threshold: f32,
    pub semantic_candidates: usize,
    pub min_shared_trigrams: usize,
    pub confidence_confirm_step: f64,
    pub confidence_contradict_step: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            near_textual_jaccard: 0.85,
            semantic_duplicate: 0.92,
            semantic_gray_zone_low: 0.75,
            semantic_gray_zone_high: 0.92,
            degraded_update_threshold: 0.80,
            semantic_candidates: 20,
            min_shared_trigrams: 3,
            confidence_confirm_step: 0.1,
            confidence_contradict_step: 0.15,
        }
    }
}

/// Ingestion pipeline backpressure and pooling.
#[derive(Debug, Clone, Copy)]
pub struct IngestConfig {
    pub queue_capacity: usize,
    pub worker_count: usize,
    pub idempotency_window: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            worker_count: 2,
            idempotency_window: Duration::from_secs(24 * 3600),
        }
    }
}

/// Resilience substrate knobs.
#[derive(Debug, Clone, Copy)]
pub struct ResilienceConfig {
    pub pool_size: usize,
    pub pool_acquire_timeout: Duration,
    pub circuit_failure_threshold: u32,
    pub circuit_recovery_timeout: Duration,
    pub event_bus_capacity: usize,
    pub embedding_deadline: Duration,
    pub extraction_deadline: Duration,
    pub classification_deadline: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            pool_acquire_timeout: Duration::from_secs(30),
            circuit_failure_threshold: 5,
            circuit_recovery_timeout: Duration::from_secs(600),
            event_bus_capacity: 1024,
            embedding_deadline: Duration::from_secs(10),
            extraction_deadline: Duration::from_secs(30),
            classification_deadline: Duration::from_secs(30),
        }
    }
}

/// Embedding cache sizing.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingConfig {
    pub dimensions: usize,
    pub precompute_batch_size: usize,
    pub query_cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: 384,
            precompute_batch_size: 100,
            query_cache_capacity: 256,
        }
    }
}

/// Background maintenance sweep tuning — decay, ingest-queue compaction,
/// and embedding precompute.
#[derive(Debug, Clone, Copy)]
pub struct MaintenanceConfig {
    /// Half-life, in days, of the exponential salience decay `maintain()`
    /// applies to every non-archived record. Salience is otherwise only
    /// mutated by explicit reinforcement or administrator action.
    pub salience_decay_half_life_days: f64,
    /// Decay never pushes a record's salience below this floor.
    pub salience_decay_floor: f64,
    /// `ingest_queue` rows in a terminal state (`done`/`failed`) older than
    /// this are purged on each sweep.
    pub ingest_queue_retention: Duration,
    /// Maximum number of pending degraded-mode dedup decisions
    /// re-adjudicated per `maintain()` sweep.
    pub degraded_reclassify_batch_size: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            salience_decay_half_life_days: 90.0,
            salience_decay_floor: 0.05,
            ingest_queue_retention: Duration::from_secs(7 * 24 * 3600),
            degraded_reclassify_batch_size: 100,
        }
    }
}

/// Top-level configuration, composed of one struct per component family.
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    pub bm25: Bm25Config,
    pub hybrid: HybridConfig,
    pub scheduler: SchedulerConfig,
    pub dedup: DedupConfig,
    pub ingest: IngestConfig,
    pub resilience: ResilienceConfig,
    pub embedding: EmbeddingConfig,
    pub maintenance: MaintenanceConfig,
    /// Maximum content length for a memory record.
    pub max_content_bytes: usize,
    /// Version entries retained per record before pruning (manifest kept).
    pub max_versions_retained: usize,
}

/// Default content size limit: 64 KiB.
pub const DEFAULT_MAX_CONTENT_BYTES: usize = 64 * 1024;

impl Config {
    /// Build the default configuration.
    pub fn new() -> Self {
        Self {
            max_content_bytes: DEFAULT_MAX_CONTENT_BYTES,
            max_versions_retained: 10,
            ..Default::default()
        }
    }
}
