//! The ingestion pipeline. Transforms a session transcript into
//! zero or more stored memory records: extraction (through the language
//! model, behind a circuit breaker) → dedup filter → write →
//! index update → schedule touch → event bus publish.
//!
//! `commit_candidate` is the shared write path: both this pipeline's
//! workers and the orchestrator's direct `save()` call through it, so a
//! single-memory save and an extracted-from-transcript save behave
//! identically once a candidate exists.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::IngestConfig;
use crate::dedup::{DedupError, DedupFilter, Outcome as DedupOutcome};
use crate::embeddings::EmbeddingCache;
use crate::fsrs::{SchedulerParams, ScheduleEntry};
use crate::llm::LanguageModel;
use crate::record::{MemoryRecord, NewMemory, Patch, VersionReason};
use crate::relational::{IngestStatus, RelationalStore};
use crate::resilience::{CircuitBreaker, Event, EventBus, PoolError};
use crate::search::{HybridRanker, LexicalIndex, VectorIndex};
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("ingest queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("language model unavailable (circuit open), transcript deferred")]
    ModelUnavailable,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("dedup error: {0}")]
    Dedup(#[from] DedupError),

    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Result of committing one extracted/submitted candidate through the
/// write path. Mirrors [`DedupOutcome`] but carries hydrated records so
/// callers don't need a follow-up `get`.
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    New(MemoryRecord),
    Duplicate(MemoryRecord),
    Updated(MemoryRecord),
    Conflict { new: MemoryRecord, other: MemoryRecord },
}

/// The components a write path needs; shared between the ingestion
/// workers and the orchestrator's direct `save()`.
pub struct Components {
    pub store: Arc<Store>,
    pub vector: Arc<VectorIndex>,
    pub lexical: Arc<LexicalIndex>,
    pub dedup: Arc<DedupFilter>,
    pub embeddings: Arc<EmbeddingCache>,
    pub relational: Arc<RelationalStore>,
    pub bus: Arc<EventBus>,
    pub ranker: Arc<HybridRanker>,
    pub scheduler_params: SchedulerParams,
}

fn reindex_new_or_updated(components: &Components, record: &MemoryRecord) {
    match components.embeddings.get_or_compute(&record.content) {
        Ok(vector) => {
            if let Err(e) = components.vector.insert(&record.id, vector) {
                tracing::warn!(id = %record.id, error = %e, "vector insert failed");
            }
        }
        Err(e) => {
            tracing::warn!(id = %record.id, error = %e, "embedding unavailable, vector index not updated");
        }
    }
    components.lexical.insert(&record.id, &record.content);
    components
        .dedup
        .index_record(&record.id, &record.content_hash, &record.content);
}

/// Run `candidate` through the dedup filter and commit the resulting
/// decision (dedup's Update handling: no-op on a confirmed duplicate).
pub fn commit_candidate(
    components: &Components,
    candidate: NewMemory,
) -> Result<CommitOutcome, IngestError> {
    let outcome = components.dedup.evaluate(&candidate)?;

    match outcome {
        DedupOutcome::Duplicate(id) => {
            let record = components.store.get(&id)?;
            Ok(CommitOutcome::Duplicate(record))
        }
        DedupOutcome::New => {
            let project = candidate.project.clone();
            let record = components.store.put(candidate)?;
            reindex_new_or_updated(components, &record);
            components.relational.put_schedule(&ScheduleEntry::new(&record.id))?;
            components.ranker.invalidate_for_project(project.as_deref());
            components.bus.publish(
                Some(record.id.clone()),
                project,
                Event::MemorySaved {
                    content_hash: record.content_hash.clone(),
                    new_record: true,
                },
            );
            Ok(CommitOutcome::New(record))
        }
        DedupOutcome::Update { id, patch } => {
            let existing = components.store.get(&id)?;
            let old_hash = existing.content_hash.clone();
            let updated = components.store.update(&id, existing.version, patch)?;
            components.dedup.remove_record(&id, &old_hash);
            reindex_new_or_updated(components, &updated);
            components
                .ranker
                .invalidate_for_project(updated.project.as_deref());
            components.bus.publish(
                Some(updated.id.clone()),
                updated.project.clone(),
                Event::MemoryUpdated,
            );
            Ok(CommitOutcome::Updated(updated))
        }
        DedupOutcome::Conflict(other_id) => {
            let project = candidate.project.clone();
            let new_record = components.store.put(candidate)?;
            reindex_new_or_updated(components, &new_record);
            components.relational.put_schedule(&ScheduleEntry::new(&new_record.id))?;
            components.ranker.invalidate_for_project(project.as_deref());
            components.bus.publish(
                Some(new_record.id.clone()),
                project,
                Event::MemorySaved {
                    content_hash: new_record.content_hash.clone(),
                    new_record: true,
                },
            );

            let other_before = components.store.get(&other_id)?;
            let patch = Patch {
                contradictions_delta: 1,
                reason: VersionReason::ContradictionResolved,
                ..Default::default()
            };
            let other = components
                .store
                .update(&other_id, other_before.version, patch)?;
            components
                .ranker
                .invalidate_for_project(other.project.as_deref());
            components.bus.publish(
                Some(other_id.clone()),
                other.project.clone(),
                Event::Contradiction {
                    other_id: other_id.clone(),
                },
            );

            Ok(CommitOutcome::Conflict {
                new: new_record,
                other,
            })
        }
    }
}

struct Submission {
    originator: String,
    text: String,
    project: Option<String>,
}

/// The bounded queue plus worker pool backing asynchronous ingestion.
pub struct IngestPipeline {
    tx: mpsc::Sender<Submission>,
    capacity: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    // Keeps the receiver side alive even if `worker_count` is 0 (test-only
    // edge case); workers hold their own clone of the same `Arc`.
    _rx_keepalive: Arc<tokio::sync::Mutex<mpsc::Receiver<Submission>>>,
    // Dedicated runtime so `Mnemex::open` can be called from ordinary
    // synchronous code: the orchestrator façade makes no assumption that
    // its caller is itself running inside a Tokio reactor.
    _runtime: tokio::runtime::Runtime,
}

impl IngestPipeline {
    /// Spawn `config.worker_count` drain workers over a queue of
    /// `config.queue_capacity`. Each worker extracts, runs the candidates
    /// through `commit_candidate`, and touches the schedule/event bus.
    pub fn spawn(
        components: Arc<Components>,
        model: Arc<dyn LanguageModel>,
        extraction_circuit: Arc<CircuitBreaker>,
        extraction_deadline: Duration,
        config: IngestConfig,
    ) -> Arc<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_count.max(1))
            .thread_name("mnemex-ingest")
            .enable_all()
            .build()
            .expect("failed to start ingestion runtime");

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let rx = Arc::clone(&rx);
            let components = Arc::clone(&components);
            let model = Arc::clone(&model);
            let extraction_circuit = Arc::clone(&extraction_circuit);
            let idempotency_window = chrono::Duration::from_std(config.idempotency_window)
                .unwrap_or_else(|_| chrono::Duration::hours(24));

            let handle = runtime.spawn(async move {
                loop {
                    let submission = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(submission) = submission else {
                        break;
                    };
                    tracing::debug!(worker_id, originator = %submission.originator, "ingest worker draining transcript");
                    process_submission(
                        &components,
                        &model,
                        &extraction_circuit,
                        extraction_deadline,
                        idempotency_window,
                        submission,
                    );
                }
            });
            workers.push(handle);
        }

        Arc::new(Self {
            tx,
            capacity: config.queue_capacity,
            workers: Mutex::new(workers),
            _rx_keepalive: rx,
            _runtime: runtime,
        })
    }

    /// Enqueue a transcript. Non-blocking: returns `QueueFull` immediately
    /// on overflow rather than ever blocking the caller.
    pub fn submit(
        &self,
        originator: impl Into<String>,
        text: impl Into<String>,
        project: Option<String>,
    ) -> Result<(), IngestError> {
        self.tx
            .try_send(Submission {
                originator: originator.into(),
                text: text.into(),
                project,
            })
            .map_err(|_| IngestError::QueueFull {
                capacity: self.capacity,
            })
    }

    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut self.workers.lock().unwrap());
        for handle in handles {
            handle.abort();
        }
    }
}

fn process_submission(
    components: &Components,
    model: &Arc<dyn LanguageModel>,
    extraction_circuit: &CircuitBreaker,
    extraction_deadline: Duration,
    idempotency_window: chrono::Duration,
    submission: Submission,
) {
    match components
        .relational
        .recent_completion_for_originator(&submission.originator, idempotency_window)
    {
        Ok(Some(_)) => {
            tracing::debug!(originator = %submission.originator, "skipping: already ingested within idempotency window");
            return;
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = %e, "idempotency check failed, proceeding anyway");
        }
    }

    let seq = match components.relational.enqueue_ingest(&submission.originator, &submission.text) {
        Ok(seq) => seq,
        Err(e) => {
            tracing::error!(error = %e, "failed to durably enqueue transcript");
            return;
        }
    };
    let _ = components.relational.set_ingest_status(seq, IngestStatus::InProgress, 1);

    let model_ref = Arc::clone(model);
    let text = submission.text.clone();
    let result: Result<Vec<crate::llm::ExtractedMemory>, ()> = extraction_circuit.call(
        move || match model_ref.extract(&text, extraction_deadline) {
            Ok(extracted) => Ok(Ok(extracted)),
            Err(_) => Err(()),
        },
        || Err(()),
    );

    let extracted = match result {
        Ok(extracted) => extracted,
        Err(()) => {
            let _ = components.relational.set_ingest_status(seq, IngestStatus::Deferred, 1);
            tracing::warn!(originator = %submission.originator, "extraction model unavailable, transcript deferred");
            return;
        }
    };

    for memory in extracted {
        let candidate = NewMemory {
            content: memory.content,
            tags: memory.tags,
            salience: memory.salience,
            origin_session: Some(submission.originator.clone()),
            project: submission.project.clone(),
        };
        if let Err(e) = commit_candidate(components, candidate) {
            tracing::error!(error = %e, "failed to commit extracted candidate");
        }
    }

    let _ = components.relational.set_ingest_status(seq, IngestStatus::Done, 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Bm25Config, Config, EmbeddingConfig};
    use crate::embeddings::DeterministicEmbeddingModel;
    use crate::llm::DeterministicLanguageModel;
    use tempfile::tempdir;

    fn components() -> (tempfile::TempDir, Components) {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::new_for_test(dir.path()));
        let dims = EmbeddingConfig::default().dimensions;
        let vector = Arc::new(VectorIndex::new(dims, 4));
        let lexical = Arc::new(LexicalIndex::new(Bm25Config::default()));
        let embed_model = Arc::new(DeterministicEmbeddingModel::new(dims));
        let embed_circuit = Arc::new(CircuitBreaker::new("test-embed", 5, Duration::from_secs(600)));
        let embeddings = Arc::new(EmbeddingCache::new(embed_model, embed_circuit, Duration::from_secs(1)));
        let llm_model = Arc::new(DeterministicLanguageModel::new());
        let classify_circuit = Arc::new(CircuitBreaker::new("test-classify", 5, Duration::from_secs(600)));
        let relational = Arc::new(crate::relational::open_in_memory(2, Duration::from_secs(1)).unwrap());
        let dedup = Arc::new(DedupFilter::new(
            Arc::clone(&store),
            Arc::clone(&vector),
            Arc::clone(&lexical),
            Arc::clone(&embeddings),
            llm_model,
            classify_circuit,
            Duration::from_secs(1),
            Arc::clone(&relational),
            Config::new().dedup,
        ));
        let bus = Arc::new(EventBus::new(16));
        let scheduler_params = Config::new().scheduler.into();
        let ranker = Arc::new(HybridRanker::new(
            Arc::clone(&store),
            Arc::clone(&vector),
            Arc::clone(&lexical),
            Arc::clone(&embeddings),
            Config::new().hybrid,
        ));

        (
            dir,
            Components {
                store,
                vector,
                lexical,
                dedup,
                embeddings,
                relational,
                bus,
                ranker,
                scheduler_params,
            },
        )
    }

    #[test]
    fn new_candidate_commits_and_touches_schedule() {
        let (_dir, components) = components();
        let mut rx = components.bus.subscribe();
        let outcome = commit_candidate(&components, NewMemory::new("prefers dark mode")).unwrap();
        let CommitOutcome::New(record) = outcome else {
            panic!("expected New");
        };
        assert_eq!(record.version, 1);
        assert!(components.relational.get_schedule(&record.id).unwrap().is_some());
        let envelope = rx.try_recv().unwrap();
        assert!(matches!(envelope.event, Event::MemorySaved { new_record: true, .. }));
    }

    #[test]
    fn duplicate_candidate_is_a_no_op() {
        let (_dir, components) = components();
        let first = commit_candidate(&components, NewMemory::new("prefers dark mode")).unwrap();
        let CommitOutcome::New(record) = first else {
            panic!("expected New");
        };
        let second = commit_candidate(&components, NewMemory::new("prefers dark mode")).unwrap();
        let CommitOutcome::Duplicate(dup) = second else {
            panic!("expected Duplicate");
        };
        assert_eq!(dup.id, record.id);
        assert_eq!(dup.version, record.version);
    }

    #[tokio::test]
    async fn queue_full_is_rejected_immediately() {
        let (_dir, components) = components();
        let components = Arc::new(components);
        let model = Arc::new(DeterministicLanguageModel::new());
        let circuit = Arc::new(CircuitBreaker::new("test-extract", 5, Duration::from_secs(600)));
        let config = crate::config::IngestConfig {
            queue_capacity: 1,
            worker_count: 0,
            idempotency_window: Duration::from_secs(3600),
        };
        let pipeline = IngestPipeline::spawn(components, model, circuit, Duration::from_secs(1), config);
        pipeline.submit("session-1", "first", None).unwrap();
        let err = pipeline.submit("session-2", "second", None).unwrap_err();
        assert!(matches!(err, IngestError::QueueFull { capacity: 1 }));
    }
}
