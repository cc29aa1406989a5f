//! The public read path — candidate fusion, filtering, and the
//! single-flight result cache.
//!
//! Deliberately not reciprocal-rank-fusion: BM25 scores are unbounded while
//! inner products are already in [-1, 1], so a naive weighted sum across
//! the two pools would let lexical outliers swamp semantic ones. Each
//! pool's scores are min-max normalized to [0, 1] within the candidates it
//! actually returned before the weighted sum runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::config::HybridConfig;
use crate::embeddings::EmbeddingCache;
use crate::record::{ListFilter, MemoryRecord};
use crate::store::Store;

use super::lexical::LexicalIndex;
use super::vector::VectorIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Hybrid,
    Semantic,
    Lexical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    Relevance,
    Recency,
    Salience,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub project: Option<String>,
    pub tags: std::collections::BTreeSet<String>,
    pub min_salience: f64,
    pub include_archived: bool,
    pub order: OrderBy,
    pub mode: SearchMode,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            project: None,
            tags: Default::default(),
            min_salience: 0.0,
            include_archived: false,
            order: OrderBy::Relevance,
            mode: SearchMode::Hybrid,
        }
    }
}

impl SearchOptions {
    fn as_filter(&self) -> ListFilter {
        ListFilter {
            project: self.project.clone(),
            tags: self.tags.clone(),
            min_salience: self.min_salience,
            include_archived: self.include_archived,
        }
    }
}

/// A ranked hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub record: MemoryRecord,
    pub score: f32,
}

/// `degraded` is set when the embedding circuit was open and a `hybrid`
/// request silently fell back to lexical-only.
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub degraded: bool,
}

fn fingerprint(query: &str, options: &SearchOptions) -> String {
    let canon = crate::hashing::canonicalize_query(query);
    let tags: Vec<&String> = options.tags.iter().collect();
    let raw = format!(
        "{canon}|{:?}|{:?}|{}|{}|{:?}|{:?}",
        options.project,
        tags,
        options.min_salience,
        options.include_archived,
        options.order,
        options.mode
    );
    crate::hashing::content_hash(&raw)
}

struct CachedResult {
    /// Record id plus the fused score it was computed with — the cache's
    /// attribute list per §3 is "identifiers with fused scores", not bare
    /// ids, so a cache hit reproduces the exact same result a fresh
    /// computation would have, not a re-hydrated id list with scores
    /// zeroed out.
    hits: Vec<(String, f32)>,
    project_scope: Option<String>,
    expires_at: Instant,
}

/// Single-flight, TTL-expiring cache of fingerprint -> ordered (id, score) list.
struct ResultCache {
    entries: RwLock<HashMap<String, CachedResult>>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    ttl: Duration,
}

impl ResultCache {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn get(&self, fp: &str) -> Option<Vec<(String, f32)>> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(fp)?;
        if entry.expires_at < Instant::now() {
            return None;
        }
        Some(entry.hits.clone())
    }

    fn put(&self, fp: &str, hits: Vec<(String, f32)>, project_scope: Option<String>) {
        self.entries.write().unwrap().insert(
            fp.to_string(),
            CachedResult {
                hits,
                project_scope,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Cache invalidation: drop every entry scoped to `project`
    /// (exact match) or to no project at all (global queries see every
    /// record, so any write can affect them).
    fn invalidate_for_project(&self, project: Option<&str>) {
        let mut entries = self.entries.write().unwrap();
        entries.retain(|_, entry| {
            let affected =
                entry.project_scope.is_none() || entry.project_scope.as_deref() == project;
            !affected
        });
    }

    fn lock_for(&self, fp: &str) -> Arc<Mutex<()>> {
        self.in_flight
            .lock()
            .unwrap()
            .entry(fp.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release(&self, fp: &str) {
        self.in_flight.lock().unwrap().remove(fp);
    }
}

fn min_max_normalize(scores: &mut HashMap<String, f32>) {
    if scores.is_empty() {
        return;
    }
    let min = scores.values().cloned().fold(f32::INFINITY, f32::min);
    let max = scores.values().cloned().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if range <= 0.0 {
        for v in scores.values_mut() {
            *v = 1.0;
        }
        return;
    }
    for v in scores.values_mut() {
        *v = (*v - min) / range;
    }
}

/// The hybrid ranker: owns the cache, composes the vector and lexical
/// indexes, and hydrates hits from the store.
pub struct HybridRanker {
    store: Arc<Store>,
    vector: Arc<VectorIndex>,
    lexical: Arc<LexicalIndex>,
    embeddings: Arc<EmbeddingCache>,
    cache: ResultCache,
    config: HybridConfig,
}

impl HybridRanker {
    pub fn new(
        store: Arc<Store>,
        vector: Arc<VectorIndex>,
        lexical: Arc<LexicalIndex>,
        embeddings: Arc<EmbeddingCache>,
        config: HybridConfig,
    ) -> Self {
        Self {
            store,
            vector,
            lexical,
            embeddings,
            cache: ResultCache::new(config.cache_ttl),
            config,
        }
    }

    pub fn invalidate_for_project(&self, project: Option<&str>) {
        self.cache.invalidate_for_project(project);
    }

    pub fn search(&self, query: &str, k: usize, options: &SearchOptions) -> SearchResponse {
        let fp = fingerprint(query, options);

        if let Some(cached) = self.cache.get(&fp) {
            return SearchResponse {
                hits: self.hydrate(cached, options),
                degraded: false,
            };
        }

        let lock = self.cache.lock_for(&fp);
        let _guard = lock.lock().unwrap();

        if let Some(cached) = self.cache.get(&fp) {
            self.cache.release(&fp);
            return SearchResponse {
                hits: self.hydrate(cached, options),
                degraded: false,
            };
        }

        let (hits, degraded) = self.compute(query, k, options);
        let cached: Vec<(String, f32)> = hits
            .iter()
            .map(|h| (h.record.id.clone(), h.score))
            .collect();
        self.cache.put(&fp, cached, options.project.clone());
        self.cache.release(&fp);

        SearchResponse { hits, degraded }
    }

    fn compute(&self, query: &str, k: usize, options: &SearchOptions) -> (Vec<SearchHit>, bool) {
        let pool_size = self.config.pool_multiplier * k.max(1);
        let mut degraded = false;

        let semantic = if options.mode != SearchMode::Lexical {
            match self.embeddings.get_or_compute(query) {
                Ok(query_vector) => Some(
                    self.vector
                        .search(&query_vector, pool_size, |_| true)
                        .unwrap_or_default(),
                ),
                Err(_) => {
                    if options.mode == SearchMode::Semantic {
                        Some(Vec::new())
                    } else {
                        degraded = true;
                        None
                    }
                }
            }
        } else {
            None
        };

        let lexical = if options.mode != SearchMode::Semantic {
            Some(self.lexical.search(query, pool_size))
        } else {
            None
        };

        let mut semantic_scores: HashMap<String, f32> =
            semantic.unwrap_or_default().into_iter().collect();
        let mut lexical_scores: HashMap<String, f32> =
            lexical.unwrap_or_default().into_iter().collect();
        min_max_normalize(&mut semantic_scores);
        min_max_normalize(&mut lexical_scores);

        let candidate_ids: HashSet<String> = semantic_scores
            .keys()
            .cloned()
            .chain(lexical_scores.keys().cloned())
            .collect();

        let now = Utc::now();
        let mut fused: Vec<(MemoryRecord, f32)> = Vec::new();
        for id in candidate_ids {
            let Ok(record) = self.store.get(&id) else {
                continue;
            };
            let semantic_norm = semantic_scores.get(&id).copied().unwrap_or(0.0);
            let lexical_norm = lexical_scores.get(&id).copied().unwrap_or(0.0);
            let delta_days = (now - record.updated_at).num_seconds() as f64 / 86_400.0;
            let recency = (-delta_days.max(0.0) / self.config.recency_tau_days).exp() as f32;
            let salience = record.salience as f32;

            let score = self.config.semantic_weight * semantic_norm
                + self.config.lexical_weight * lexical_norm
                + self.config.recency_weight * recency
                + self.config.salience_weight * salience;

            fused.push((record, score));
        }

        match options.order {
            OrderBy::Relevance => fused.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.0.updated_at.cmp(&a.0.updated_at))
                    .then_with(|| a.0.id.cmp(&b.0.id))
            }),
            OrderBy::Recency => fused.sort_by(|a, b| b.0.updated_at.cmp(&a.0.updated_at)),
            OrderBy::Salience => fused.sort_by(|a, b| {
                b.0.salience
                    .partial_cmp(&a.0.salience)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        }

        let filter = options.as_filter();
        let hits: Vec<SearchHit> = fused
            .into_iter()
            .filter(|(record, _)| filter.matches(record))
            .take(k)
            .map(|(record, score)| SearchHit { record, score })
            .collect();

        (hits, degraded)
    }

    fn hydrate(&self, cached: Vec<(String, f32)>, options: &SearchOptions) -> Vec<SearchHit> {
        let filter = options.as_filter();
        cached
            .into_iter()
            .filter_map(|(id, score)| self.store.get(&id).ok().map(|record| (record, score)))
            .filter(|(record, _)| filter.matches(record))
            .map(|(record, score)| SearchHit { record, score })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Bm25Config, EmbeddingConfig};
    use crate::embeddings::{DeterministicEmbeddingModel, EmbeddingCache};
    use crate::record::NewMemory;
    use crate::resilience::CircuitBreaker;
    use tempfile::tempdir;

    fn ranker() -> (tempfile::TempDir, HybridRanker) {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::new_for_test(dir.path()));
        let dims = EmbeddingConfig::default().dimensions;
        let vector = Arc::new(VectorIndex::new(dims, 4));
        let lexical = Arc::new(LexicalIndex::new(Bm25Config::default()));
        let model = Arc::new(DeterministicEmbeddingModel::new(dims));
        let circuit = Arc::new(CircuitBreaker::new("test-embed", 5, Duration::from_secs(600)));
        let embeddings = Arc::new(EmbeddingCache::new(model, circuit, Duration::from_secs(1)));
        let ranker = HybridRanker::new(store, vector, lexical, embeddings, HybridConfig::default());
        (dir, ranker)
    }

    #[test]
    fn lexical_only_mode_skips_the_vector_pool() {
        let (_dir, ranker) = ranker();
        ranker.lexical.insert("rec-1", "prefers dark mode");
        let options = SearchOptions {
            mode: SearchMode::Lexical,
            ..Default::default()
        };
        // no record in the store, so nothing hydrates, but this must not panic
        let response = ranker.search("dark mode", 5, &options);
        assert!(!response.degraded);
        assert!(response.hits.is_empty());
    }
}
