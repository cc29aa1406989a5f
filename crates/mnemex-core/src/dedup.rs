//! The contradiction/dedup filter. Given an incoming candidate,
//! decides one of `{New, Duplicate(id), Update(id), Conflict(id)}` through
//! four short-circuiting stages: exact content-hash, near-textual Jaccard
//! over trigram-sharing neighbors, semantic similarity, and (only for the
//! remaining gray zone) a model-assisted classification behind a circuit
//! breaker.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;

use crate::config::DedupConfig;
use crate::embeddings::{EmbeddingCache, ModelError};
use crate::llm::{LanguageModel, Verdict};
use crate::record::{NewMemory, Patch, VersionReason};
use crate::relational::RelationalStore;
use crate::resilience::{CircuitBreaker, PoolError};
use crate::search::{tokenize, LexicalIndex, VectorIndex, VectorSearchError};
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("vector search error: {0}")]
    VectorSearch(#[from] VectorSearchError),

    #[error("relational store error: {0}")]
    Pool(#[from] PoolError),
}

/// The filter's verdict. `Update` carries the ready-to-apply patch so the
/// caller (the ingestion pipeline or the orchestrator) need only call `Store::update` with it.
#[derive(Debug, Clone)]
pub enum Outcome {
    New,
    Duplicate(String),
    Update { id: String, patch: Patch },
    Conflict(String),
}

/// Whether a classification result was produced by the model or by the
/// degraded-mode fallback rule — surfaced so the nightly job can
/// re-adjudicate degraded decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationMode {
    Model,
    Degraded,
}

/// Word-trigram inverted index used to retrieve near-textual candidates
/// Maintained alongside the lexical index rather than
/// inside it, since BM25's inverted index is keyed on unigrams.
struct TrigramIndex {
    postings: HashMap<String, HashSet<String>>,
    by_id: HashMap<String, HashSet<String>>,
}

fn trigrams(tokens: &[String]) -> HashSet<String> {
    tokens
        .windows(3)
        .map(|w| w.join(" "))
        .collect()
}

impl TrigramIndex {
    fn new() -> Self {
        Self {
            postings: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    fn insert(&mut self, id: &str, text: &str) {
        self.remove(id);
        let tokens = tokenize(text);
        let grams = trigrams(&tokens);
        for gram in &grams {
            self.postings
                .entry(gram.clone())
                .or_default()
                .insert(id.to_string());
        }
        self.by_id.insert(id.to_string(), grams);
    }

    fn remove(&mut self, id: &str) {
        if let Some(grams) = self.by_id.remove(id) {
            for gram in grams {
                if let Some(ids) = self.postings.get_mut(&gram) {
                    ids.remove(id);
                    if ids.is_empty() {
                        self.postings.remove(&gram);
                    }
                }
            }
        }
    }

    /// Ids sharing at least `min_shared` trigrams with `text`.
    fn candidates_sharing(&self, text: &str, min_shared: usize) -> Vec<String> {
        let tokens = tokenize(text);
        let grams = trigrams(&tokens);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for gram in &grams {
            if let Some(ids) = self.postings.get(gram) {
                for id in ids {
                    *counts.entry(id.clone()).or_insert(0) += 1;
                }
            }
        }
        counts
            .into_iter()
            .filter(|(_, count)| *count >= min_shared)
            .map(|(id, _)| id)
            .collect()
    }
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    if intersection == 0 {
        return 0.0;
    }
    let union = a.union(b).count();
    intersection as f64 / union.max(1) as f64
}

/// Owns the trigram index and composes the store/vector/embedding/model
/// dependencies the four stages need.
pub struct DedupFilter {
    store: Arc<Store>,
    vector: Arc<VectorIndex>,
    lexical: Arc<LexicalIndex>,
    embeddings: Arc<EmbeddingCache>,
    model: Arc<dyn LanguageModel>,
    classification_circuit: Arc<CircuitBreaker>,
    classification_deadline: Duration,
    relational: Arc<RelationalStore>,
    config: DedupConfig,
    trigrams: RwLock<TrigramIndex>,
    content_hashes: RwLock<HashMap<String, String>>,
}

impl DedupFilter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        vector: Arc<VectorIndex>,
        lexical: Arc<LexicalIndex>,
        embeddings: Arc<EmbeddingCache>,
        model: Arc<dyn LanguageModel>,
        classification_circuit: Arc<CircuitBreaker>,
        classification_deadline: Duration,
        relational: Arc<RelationalStore>,
        config: DedupConfig,
    ) -> Self {
        Self {
            store,
            vector,
            lexical,
            embeddings,
            model,
            classification_circuit,
            classification_deadline,
            relational,
            config,
            trigrams: RwLock::new(TrigramIndex::new()),
            content_hashes: RwLock::new(HashMap::new()),
        }
    }

    /// Called by the orchestrator after every successful write so later
    /// dedup checks see this record as a candidate neighbor.
    pub fn index_record(&self, id: &str, content_hash: &str, text: &str) {
        self.trigrams.write().unwrap().insert(id, text);
        self.content_hashes
            .write()
            .unwrap()
            .insert(content_hash.to_string(), id.to_string());
    }

    pub fn remove_record(&self, id: &str, content_hash: &str) {
        self.trigrams.write().unwrap().remove(id);
        let mut hashes = self.content_hashes.write().unwrap();
        if hashes.get(content_hash).map(|v| v.as_str()) == Some(id) {
            hashes.remove(content_hash);
        }
    }

    /// Run the four-stage pipeline against `candidate`.
    pub fn evaluate(&self, candidate: &NewMemory) -> Result<Outcome, DedupError> {
        let content_hash = crate::hashing::content_hash(&candidate.content);

        // Stage 1: exact.
        if let Some(id) = self.content_hashes.read().unwrap().get(&content_hash).cloned() {
            tracing::debug!(id, "dedup stage 1 exact match");
            return Ok(Outcome::Duplicate(id));
        }

        // Stage 2: near-textual.
        let candidate_tokens: HashSet<String> = tokenize(&candidate.content).into_iter().collect();
        let sharing = self
            .trigrams
            .read()
            .unwrap()
            .candidates_sharing(&candidate.content, self.config.min_shared_trigrams);
        for id in &sharing {
            let Ok(existing) = self.store.get(id) else {
                continue;
            };
            let existing_tokens: HashSet<String> = tokenize(&existing.content).into_iter().collect();
            let score = jaccard(&candidate_tokens, &existing_tokens);
            if score >= self.config.near_textual_jaccard {
                tracing::debug!(id, score, "dedup stage 2 near-textual duplicate");
                return Ok(Outcome::Duplicate(id.clone()));
            }
        }

        // Stage 3: semantic.
        let Ok(query_vector) = self.embeddings.get_or_compute(&candidate.content) else {
            // Embedding circuit open: semantic stage is unavailable, fall
            // through to New rather than block ingestion on it.
            tracing::warn!("dedup stage 3 skipped: embedding unavailable");
            return Ok(Outcome::New);
        };
        let neighbors = self
            .vector
            .search(&query_vector, self.config.semantic_candidates, |_| true)?;

        let mut gray_zone: Vec<(String, f32)> = Vec::new();
        for (id, similarity) in neighbors {
            if similarity >= self.config.semantic_duplicate {
                tracing::debug!(id, similarity, "dedup stage 3 semantic duplicate");
                return Ok(Outcome::Duplicate(id));
            }
            if similarity >= self.config.semantic_gray_zone_low
                && similarity < self.config.semantic_gray_zone_high
            {
                gray_zone.push((id, similarity));
            }
        }

        if gray_zone.is_empty() {
            return Ok(Outcome::New);
        }

        // Stage 4: model-assisted (or degraded) classification over the
        // gray zone, highest similarity first so tie-breaks favor it.
        gray_zone.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        self.classify_gray_zone(candidate, &gray_zone)
    }

    fn classify_gray_zone(
        &self,
        candidate: &NewMemory,
        gray_zone: &[(String, f32)],
    ) -> Result<Outcome, DedupError> {
        let mut best_contradict: Option<(String, f32)> = None;
        let mut first_update: Option<String> = None;
        let mut first_same: Option<String> = None;

        for (id, similarity) in gray_zone {
            let Ok(neighbor) = self.store.get(id) else {
                continue;
            };
            let (verdict, mode) = self.classify_one(&candidate.content, &neighbor.content, *similarity);
            if mode == ClassificationMode::Degraded {
                tracing::info!(id, "dedup stage 4 degraded classification");
                self.relational.record_degraded_decision(
                    &candidate.content,
                    id,
                    *similarity,
                    verdict,
                    Utc::now(),
                )?;
            }
            match verdict {
                Verdict::Contradict => {
                    if best_contradict.as_ref().map(|(_, s)| *similarity > *s).unwrap_or(true) {
                        best_contradict = Some((id.clone(), *similarity));
                    }
                }
                Verdict::Update if first_update.is_none() => first_update = Some(id.clone()),
                Verdict::Same if first_same.is_none() => first_same = Some(id.clone()),
                _ => {}
            }
        }

        if let Some((id, _)) = best_contradict {
            return Ok(Outcome::Conflict(id));
        }
        if let Some(id) = first_update {
            let patch = Patch {
                content: Some(candidate.content.clone()),
                tags: Some(candidate.tags.clone()),
                reason: VersionReason::DedupMerge,
                ..Default::default()
            };
            return Ok(Outcome::Update { id, patch });
        }
        if let Some(id) = first_same {
            return Ok(Outcome::Duplicate(id));
        }
        Ok(Outcome::New)
    }

    /// Classify one (candidate, neighbor) pair through the circuit breaker,
    /// falling back to the deterministic degraded rule when open.
    fn classify_one(&self, candidate: &str, neighbor: &str, similarity: f32) -> (Verdict, ClassificationMode) {
        let model = Arc::clone(&self.model);
        let deadline = self.classification_deadline;
        let candidate = candidate.to_string();
        let neighbor_owned = neighbor.to_string();
        let last_error: Arc<Mutex<Option<ModelError>>> = Arc::new(Mutex::new(None));
        let last_error_for_call = Arc::clone(&last_error);

        let result: Result<Verdict, ()> = self.classification_circuit.call(
            move || match model.classify(&candidate, &neighbor_owned, deadline) {
                Ok(verdict) => Ok(Ok(verdict)),
                Err(e) => {
                    *last_error_for_call.lock().unwrap() = Some(e);
                    Err(())
                }
            },
            || Err(()),
        );

        match result {
            Ok(verdict) => (verdict, ClassificationMode::Model),
            Err(()) => {
                let degraded = if similarity >= self.config.degraded_update_threshold {
                    Verdict::Update
                } else {
                    Verdict::Unrelated
                };
                (degraded, ClassificationMode::Degraded)
            }
        }
    }

    /// The nightly re-adjudication job named in §4.7: re-run every
    /// unresolved degraded-mode decision through `classify_one` now that
    /// the classification circuit may have recovered. A decision whose
    /// re-run still comes back degraded (circuit still open) is left
    /// pending for the next sweep; one that resolves through the model is
    /// marked resolved, logging any verdict that flipped from the
    /// original fallback guess.
    pub fn reclassify_degraded(&self, limit: usize) -> Result<usize, DedupError> {
        let pending = self.relational.pending_degraded_decisions(limit)?;
        let mut reclassified = 0;

        for row in pending {
            let (verdict, mode) =
                self.classify_one(&row.candidate_content, &self.neighbor_content(&row.neighbor_id), row.similarity);
            if mode == ClassificationMode::Degraded {
                continue;
            }
            if verdict != row.verdict {
                tracing::info!(
                    neighbor_id = %row.neighbor_id,
                    original = ?row.verdict,
                    reclassified = ?verdict,
                    "dedup degraded decision re-adjudicated with a different verdict"
                );
            }
            self.relational.resolve_degraded_decision(row.seq)?;
            reclassified += 1;
        }

        Ok(reclassified)
    }

    fn neighbor_content(&self, id: &str) -> String {
        self.store.get(id).map(|r| r.content).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Bm25Config, EmbeddingConfig};
    use crate::embeddings::DeterministicEmbeddingModel;
    use crate::llm::DeterministicLanguageModel;
    use tempfile::tempdir;

    fn filter() -> (tempfile::TempDir, DedupFilter) {
        let (dir, filter, _relational) = filter_with_relational();
        (dir, filter)
    }

    fn filter_with_relational() -> (tempfile::TempDir, DedupFilter, Arc<RelationalStore>) {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::new_for_test(dir.path()));
        let dims = EmbeddingConfig::default().dimensions;
        let vector = Arc::new(VectorIndex::new(dims, 4));
        let lexical = Arc::new(LexicalIndex::new(Bm25Config::default()));
        let embed_model = Arc::new(DeterministicEmbeddingModel::new(dims));
        let embed_circuit = Arc::new(CircuitBreaker::new("test-embed", 5, Duration::from_secs(600)));
        let embeddings = Arc::new(EmbeddingCache::new(embed_model, embed_circuit, Duration::from_secs(1)));
        let model = Arc::new(DeterministicLanguageModel::new());
        let classify_circuit = Arc::new(CircuitBreaker::new("test-classify", 5, Duration::from_secs(600)));
        let relational = Arc::new(crate::relational::open_in_memory(2, Duration::from_secs(1)).unwrap());
        let filter = DedupFilter::new(
            store,
            vector,
            lexical,
            embeddings,
            model,
            classify_circuit,
            Duration::from_secs(1),
            Arc::clone(&relational),
            DedupConfig::default(),
        );
        (dir, filter, relational)
    }

    #[test]
    fn exact_content_hash_match_is_duplicate() {
        let (_dir, filter) = filter();
        let record = filter.store.put(NewMemory::new("prefers dark mode")).unwrap();
        filter.index_record(&record.id, &record.content_hash, &record.content);

        let outcome = filter.evaluate(&NewMemory::new("prefers dark mode")).unwrap();
        assert!(matches!(outcome, Outcome::Duplicate(id) if id == record.id));
    }

    #[test]
    fn near_textual_jaccard_above_threshold_is_duplicate() {
        let (_dir, filter) = filter();
        let record = filter
            .store
            .put(NewMemory::new("the quick brown fox jumps over the lazy dog"))
            .unwrap();
        filter.index_record(&record.id, &record.content_hash, &record.content);

        let candidate = NewMemory::new("the quick brown fox jumps over the lazy dog again");
        let outcome = filter.evaluate(&candidate).unwrap();
        assert!(matches!(outcome, Outcome::Duplicate(id) if id == record.id));
    }

    #[test]
    fn unrelated_content_is_new() {
        let (_dir, filter) = filter();
        let record = filter.store.put(NewMemory::new("prefers dark mode")).unwrap();
        filter.index_record(&record.id, &record.content_hash, &record.content);

        let outcome = filter.evaluate(&NewMemory::new("enjoys hiking on weekends")).unwrap();
        assert!(matches!(outcome, Outcome::New));
    }

    #[test]
    fn trigram_index_forgets_removed_records() {
        let mut index = TrigramIndex::new();
        index.insert("a", "one two three four five");
        assert!(!index.candidates_sharing("one two three four five", 3).is_empty());
        index.remove("a");
        assert!(index.candidates_sharing("one two three four five", 3).is_empty());
    }

    #[test]
    fn degraded_classification_is_tagged_and_later_reclassified() {
        let (_dir, filter, relational) = filter_with_relational();
        let neighbor = filter
            .store
            .put(NewMemory::new("prefers dark mode in the editor"))
            .unwrap();
        filter.index_record(&neighbor.id, &neighbor.content_hash, &neighbor.content);

        // Trip the classification circuit open.
        for _ in 0..6 {
            filter.classification_circuit.call::<()>(|| Err(()), || ());
        }

        let candidate = NewMemory::new("prefers dark mode in the code editor");
        let outcome = filter
            .classify_gray_zone(&candidate, &[(neighbor.id.clone(), 0.80)])
            .unwrap();
        assert!(matches!(outcome, Outcome::Update { .. }));

        let pending = relational.pending_degraded_decisions(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].neighbor_id, neighbor.id);

        // Circuit is still open: re-adjudication can't resolve anything yet.
        assert_eq!(filter.reclassify_degraded(10).unwrap(), 0);
        assert_eq!(relational.pending_degraded_decisions(10).unwrap().len(), 1);

        // Once the circuit recovers, the nightly sweep resolves the decision.
        filter.classification_circuit.restore(crate::resilience::CircuitState::Closed);
        assert_eq!(filter.reclassify_degraded(10).unwrap(), 1);
        assert!(relational.pending_degraded_decisions(10).unwrap().is_empty());
    }
}
