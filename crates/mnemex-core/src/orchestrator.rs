//! The orchestrator façade. This is the only place that
//! constructs every other component — there is no ambient global state and
//! no singleton anywhere below it. A direct `save()` and a transcript
//! submitted through the ingestion pipeline both end up calling
//! [`crate::ingest::commit_candidate`] against the same [`Components`]
//! bundle, so the two paths can never diverge in behavior.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::dedup::DedupFilter;
use crate::embeddings::{EmbeddingCache, EmbeddingModel};
use crate::error::{MnemexError, Result};
use crate::fsrs::{self, Rating, ReviewOutcome, ScheduleEntry, SchedulerParams};
use crate::ingest::{commit_candidate, CommitOutcome, Components, IngestPipeline};
use crate::llm::LanguageModel;
use crate::record::{ListFilter, MemoryRecord, NewMemory, Patch, VersionReason};
use crate::relational;
use crate::resilience::{CircuitBreaker, CircuitState, Envelope, Event, EventBus};
use crate::search::{CorpusStats, HybridRanker, LexicalIndex, SearchMode, SearchOptions, SearchResponse, VectorIndex};
use crate::store::{Store, StoreError};

fn map_store_err(e: StoreError) -> MnemexError {
    match e {
        StoreError::NotFound(id) => MnemexError::NotFound(id),
        StoreError::StaleWrite { id, expected, found } => MnemexError::StaleWrite { id, expected, found },
        StoreError::Corrupt { id, reason } => MnemexError::Corrupt { id, reason },
        StoreError::ContentTooLarge { limit, actual } => MnemexError::InvalidInput(format!(
            "content exceeds max_content_bytes ({limit}): {actual}"
        )),
        other => MnemexError::StoreError(other),
    }
}

/// What one `maintain()` sweep did.
#[derive(Debug, Clone)]
pub struct MaintenanceReport {
    pub salience_decayed: usize,
    pub ingest_queue_purged: usize,
    pub embeddings_precomputed: usize,
    /// Degraded-mode dedup/contradiction decisions re-run now that the
    /// classification circuit may have recovered (§4.7).
    pub degraded_reclassified: usize,
    /// Surfaced for observability only — the ranker's hot path never calls
    /// `corpus_stats()` itself.
    pub corpus_stats: CorpusStats,
}

/// The single entry surface: `save`, `search`, `get`, `review`, `archive`,
/// `maintain`, plus `submit_transcript` for the async ingestion path.
pub struct Mnemex {
    components: Arc<Components>,
    ranker: Arc<HybridRanker>,
    ingest: Arc<IngestPipeline>,
    embedding_circuit: Arc<CircuitBreaker>,
    extraction_circuit: Arc<CircuitBreaker>,
    classification_circuit: Arc<CircuitBreaker>,
    config: Config,
}

impl Mnemex {
    /// Open (or create) a full instance rooted at `root`: the record store
    /// on disk, the relational database, and every in-memory index rebuilt
    /// from the embedding cache. Rebuilding from the cache is always a
    /// valid recovery — none of the indexes built here are
    /// themselves durable.
    pub fn open(
        root: impl AsRef<Path>,
        config: Config,
        embedding_model: Arc<dyn EmbeddingModel>,
        language_model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        let root = root.as_ref();

        let store = Arc::new(
            Store::open_with_confidence_steps(
                root.join("store"),
                config.max_content_bytes,
                config.max_versions_retained,
                config.dedup.confidence_confirm_step,
                config.dedup.confidence_contradict_step,
            )
            .map_err(map_store_err)?,
        );

        let relational = Arc::new(relational::open(
            &root.join("mnemex.db"),
            config.resilience.pool_size,
            config.resilience.pool_acquire_timeout,
        )?);
        if !relational::integrity_check(relational.pool())? {
            return Err(MnemexError::IntegrityFailure(
                "startup PRAGMA integrity_check failed".into(),
            ));
        }

        let embedding_circuit = Arc::new(CircuitBreaker::new(
            "embedding",
            config.resilience.circuit_failure_threshold,
            config.resilience.circuit_recovery_timeout,
        ));
        let extraction_circuit = Arc::new(CircuitBreaker::new(
            "extraction",
            config.resilience.circuit_failure_threshold,
            config.resilience.circuit_recovery_timeout,
        ));
        let classification_circuit = Arc::new(CircuitBreaker::new(
            "classification",
            config.resilience.circuit_failure_threshold,
            config.resilience.circuit_recovery_timeout,
        ));
        for (name, circuit) in [
            ("embedding", &embedding_circuit),
            ("extraction", &extraction_circuit),
            ("classification", &classification_circuit),
        ] {
            if let Some(row) = relational.load_circuit_state(name)? {
                circuit.restore(row.state);
            }
        }

        let bus = Arc::new(EventBus::new(config.resilience.event_bus_capacity));
        let vector = Arc::new(VectorIndex::new(embedding_model.dimensions(), config.hybrid.vector_shards));
        let lexical = Arc::new(LexicalIndex::new(config.bm25));
        let embeddings = Arc::new(EmbeddingCache::new(
            Arc::clone(&embedding_model),
            Arc::clone(&embedding_circuit),
            config.resilience.embedding_deadline,
        ));
        let dedup = Arc::new(DedupFilter::new(
            Arc::clone(&store),
            Arc::clone(&vector),
            Arc::clone(&lexical),
            Arc::clone(&embeddings),
            Arc::clone(&language_model),
            Arc::clone(&classification_circuit),
            config.resilience.classification_deadline,
            Arc::clone(&relational),
            config.dedup,
        ));

        let ranker = Arc::new(HybridRanker::new(
            Arc::clone(&store),
            Arc::clone(&vector),
            Arc::clone(&lexical),
            Arc::clone(&embeddings),
            config.hybrid,
        ));

        let scheduler_params: SchedulerParams = config.scheduler.into();
        let components = Arc::new(Components {
            store: Arc::clone(&store),
            vector: Arc::clone(&vector),
            lexical: Arc::clone(&lexical),
            dedup: Arc::clone(&dedup),
            embeddings: Arc::clone(&embeddings),
            relational: Arc::clone(&relational),
            bus: Arc::clone(&bus),
            ranker: Arc::clone(&ranker),
            scheduler_params,
        });

        rebuild_indexes(&components).map_err(map_store_err)?;

        let ingest = IngestPipeline::spawn(
            Arc::clone(&components),
            Arc::clone(&language_model),
            Arc::clone(&extraction_circuit),
            config.resilience.extraction_deadline,
            config.ingest,
        );

        Ok(Self {
            components,
            ranker,
            ingest,
            embedding_circuit,
            extraction_circuit,
            classification_circuit,
            config,
        })
    }

    /// Save one memory directly, through the same `commit_candidate` write
    /// path the ingestion pipeline uses for extracted candidates.
    pub fn save(&self, new: NewMemory) -> Result<CommitOutcome> {
        if new.content.len() > self.config.max_content_bytes {
            return Err(MnemexError::InvalidInput(format!(
                "content exceeds max_content_bytes ({}): {}",
                self.config.max_content_bytes,
                new.content.len()
            )));
        }
        Ok(commit_candidate(&self.components, new)?)
    }

    /// Submit a session transcript for asynchronous extraction.
    /// Non-blocking; returns `QueueFull` immediately on backpressure.
    pub fn submit_transcript(
        &self,
        originator: impl Into<String>,
        transcript: impl Into<String>,
        project: Option<String>,
    ) -> Result<()> {
        Ok(self.ingest.submit(originator, transcript, project)?)
    }

    /// Hybrid/semantic/lexical search. `Semantic` mode against an
    /// open embedding circuit surfaces `EmbeddingUnavailable` rather than
    /// silently degrading, since the caller explicitly asked for that mode.
    pub fn search(&self, query: &str, k: usize, options: &SearchOptions) -> Result<SearchResponse> {
        if options.mode == SearchMode::Semantic && self.embedding_circuit.state() == CircuitState::Open {
            return Err(MnemexError::EmbeddingUnavailable);
        }
        Ok(self.ranker.search(query, k, options))
    }

    pub fn get(&self, id: &str) -> Result<MemoryRecord> {
        self.components.store.get(id).map_err(map_store_err)
    }

    /// The version chain for `id`, oldest first.
    pub fn versions(&self, id: &str) -> Result<Vec<crate::record::VersionEntry>> {
        self.components.store.versions(id).map_err(map_store_err)
    }

    /// Subscribe to the event bus (analytics collaborators
    /// are external subscribers, never holders of a mutable handle into
    /// the components below this façade).
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<Envelope> {
        self.components.bus.subscribe()
    }

    pub fn list(&self, filter: &ListFilter) -> Result<Vec<MemoryRecord>> {
        self.components.store.list(filter).map_err(map_store_err)
    }

    /// Record a review outcome against `id`'s schedule entry, promoting it
    /// from project-scope to global on the threshold transition.
    pub fn review(&self, id: &str, rating: Rating, reviewing_project: Option<&str>) -> Result<ReviewOutcome> {
        let record = self.components.store.get(id).map_err(map_store_err)?;
        let entry = self
            .components
            .relational
            .get_schedule(id)?
            .unwrap_or_else(|| ScheduleEntry::new(id));

        let ts = Utc::now();
        let outcome = fsrs::record_review(entry, rating, reviewing_project, self.components.scheduler_params, ts);
        self.components
            .relational
            .commit_review(&outcome.entry, ts, rating, reviewing_project)?;

        if outcome.newly_promoted {
            let patch = Patch {
                clear_project: true,
                ..Patch::with_reason(VersionReason::Promotion)
            };
            self.components
                .store
                .update(id, record.version, patch)
                .map_err(map_store_err)?;
            self.ranker.invalidate_for_project(record.project.as_deref());
            self.components.bus.publish(
                Some(id.to_string()),
                None,
                Event::Promoted {
                    stability: outcome.entry.stability,
                    review_count: outcome.entry.review_count,
                    projects_validated: outcome.entry.projects_validated.len(),
                },
            );
        }

        Ok(outcome)
    }

    /// Soft-delete `id`; hard delete is out of scope. `reason` is logged
    /// for operators; the archive itself still appends a version-chain
    /// entry even though the content doesn't change.
    pub fn archive(&self, id: &str, reason: &str) -> Result<MemoryRecord> {
        let record = self.components.store.archive(id).map_err(map_store_err)?;
        self.ranker.invalidate_for_project(record.project.as_deref());
        self.components.bus.publish(
            Some(record.id.clone()),
            record.project.clone(),
            Event::MemoryArchived,
        );
        tracing::info!(id = %record.id, reason, "record archived");
        Ok(record)
    }

    /// Background maintenance sweep: salience decay, circuit-state
    /// persistence, stale ingest-queue compaction, and an embedding
    /// precompute pass over any record the cache missed. Returns a report
    /// including the lexical index's `corpus_stats()` for observability.
    pub fn maintain(&self) -> Result<MaintenanceReport> {
        self.components.bus.publish(None, None, Event::MaintenanceTick);

        let salience_decayed = self.decay_salience()?;
        self.persist_circuit_states()?;
        let ingest_queue_purged = self.purge_stale_ingest()?;
        let embeddings_precomputed = self.precompute_missing_embeddings()?;
        let degraded_reclassified = self
            .components
            .dedup
            .reclassify_degraded(self.config.maintenance.degraded_reclassify_batch_size)?;

        Ok(MaintenanceReport {
            salience_decayed,
            ingest_queue_purged,
            embeddings_precomputed,
            degraded_reclassified,
            corpus_stats: self.components.lexical.corpus_stats(),
        })
    }

    /// Signal the ingestion workers to stop. Call before dropping the last
    /// handle if in-flight transcripts don't need to drain first.
    pub async fn shutdown(&self) {
        self.ingest.shutdown().await;
    }

    fn decay_salience(&self) -> Result<usize> {
        let half_life = self.config.maintenance.salience_decay_half_life_days;
        let floor = self.config.maintenance.salience_decay_floor;
        let now = Utc::now();
        let mut decayed = 0;

        for record in self.components.store.list(&ListFilter::default()).map_err(map_store_err)? {
            let age_days = (now - record.updated_at).num_seconds() as f64 / 86_400.0;
            if age_days <= 0.0 {
                continue;
            }
            let target = (record.salience * 0.5_f64.powf(age_days / half_life)).max(floor);
            if (target - record.salience).abs() < 1e-6 {
                continue;
            }
            let patch = Patch {
                salience: Some(target),
                ..Patch::with_reason(VersionReason::SalienceDecay)
            };
            self.components
                .store
                .update(&record.id, record.version, patch)
                .map_err(map_store_err)?;
            decayed += 1;
        }
        Ok(decayed)
    }

    /// Mirror every circuit's current state into `circuit_state` so a
    /// restart resumes Open/HalfOpen rather than re-probing from Closed
    /// `opened_at` is recorded as "now" rather than the original
    /// transition time — see DESIGN.md for why that approximation is
    /// acceptable at the 600s-default recovery-timeout granularity.
    fn persist_circuit_states(&self) -> Result<()> {
        for (name, circuit) in [
            ("embedding", &self.embedding_circuit),
            ("extraction", &self.extraction_circuit),
            ("classification", &self.classification_circuit),
        ] {
            let state = circuit.state();
            let opened_at = (state != CircuitState::Closed).then(Utc::now);
            self.components.relational.save_circuit_state(name, state, 0, opened_at)?;
        }
        Ok(())
    }

    fn purge_stale_ingest(&self) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.config.maintenance.ingest_queue_retention)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        Ok(self.components.relational.purge_completed_ingest(retention)?)
    }

    fn precompute_missing_embeddings(&self) -> Result<usize> {
        let missing: Vec<String> = self
            .components
            .store
            .list(&ListFilter::default())
            .map_err(map_store_err)?
            .into_iter()
            .filter(|r| self.components.embeddings.get(&r.content_hash).is_none())
            .map(|r| r.content)
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }
        let computed = self
            .components
            .embeddings
            .bulk_precompute(&missing, self.config.embedding.precompute_batch_size);
        Ok(computed.len())
    }
}

/// Re-derive the vector/lexical/dedup indexes from every stored record.
/// None of these indexes are durable on their own — restarting always
/// replays this against the store and the embedding cache.
fn rebuild_indexes(components: &Components) -> std::result::Result<(), StoreError> {
    let filter = ListFilter {
        include_archived: true,
        ..Default::default()
    };
    for record in components.store.list(&filter)? {
        match components.embeddings.get_or_compute(&record.content) {
            Ok(vector) => {
                let _ = components.vector.insert(&record.id, vector);
            }
            Err(e) => {
                tracing::warn!(id = %record.id, error = %e, "embedding unavailable during index rebuild");
            }
        }
        components.lexical.insert(&record.id, &record.content);
        components
            .dedup
            .index_record(&record.id, &record.content_hash, &record.content);
    }
    Ok(())
}
