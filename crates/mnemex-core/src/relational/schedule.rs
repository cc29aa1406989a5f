//! Repository methods over the tables in [`super::migrations`]: schedule
//! entries and their source-of-truth review log, circuit breaker state, the
//! event log (an audit trail, distinct from the live event bus), and the
//! durable ingest queue backing.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension};

use crate::fsrs::{Rating, ScheduleEntry};
use crate::resilience::{CircuitState, ConnectionPool, PoolError};

fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn rating_str(rating: Rating) -> &'static str {
    match rating {
        Rating::Fail => "fail",
        Rating::Hard => "hard",
        Rating::Good => "good",
        Rating::Easy => "easy",
    }
}

fn parse_rating(s: &str) -> Rating {
    match s {
        "fail" => Rating::Fail,
        "hard" => Rating::Hard,
        "easy" => Rating::Easy,
        _ => Rating::Good,
    }
}

/// A persisted circuit-breaker state row; state survives process restarts.
#[derive(Debug, Clone)]
pub struct CircuitStateRow {
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

/// `{pending, in_progress, done, deferred, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Pending,
    InProgress,
    Done,
    Deferred,
    Failed,
}

impl IngestStatus {
    fn as_str(self) -> &'static str {
        match self {
            IngestStatus::Pending => "pending",
            IngestStatus::InProgress => "in_progress",
            IngestStatus::Done => "done",
            IngestStatus::Deferred => "deferred",
            IngestStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "in_progress" => IngestStatus::InProgress,
            "done" => IngestStatus::Done,
            "deferred" => IngestStatus::Deferred,
            "failed" => IngestStatus::Failed,
            _ => IngestStatus::Pending,
        }
    }
}

fn verdict_str(verdict: crate::llm::Verdict) -> &'static str {
    match verdict {
        crate::llm::Verdict::Same => "same",
        crate::llm::Verdict::Update => "update",
        crate::llm::Verdict::Contradict => "contradict",
        crate::llm::Verdict::Unrelated => "unrelated",
    }
}

fn parse_verdict(s: &str) -> crate::llm::Verdict {
    match s {
        "same" => crate::llm::Verdict::Same,
        "contradict" => crate::llm::Verdict::Contradict,
        "unrelated" => crate::llm::Verdict::Unrelated,
        _ => crate::llm::Verdict::Update,
    }
}

/// A gray-zone classification made by the degraded-mode fallback rule
/// (classification circuit open), pending re-adjudication by `maintain()`.
#[derive(Debug, Clone)]
pub struct DegradedDecisionRow {
    pub seq: i64,
    pub ts: DateTime<Utc>,
    pub candidate_content: String,
    pub neighbor_id: String,
    pub similarity: f32,
    pub verdict: crate::llm::Verdict,
}

#[derive(Debug, Clone)]
pub struct IngestQueueRow {
    pub seq: i64,
    pub ts: DateTime<Utc>,
    pub originator: String,
    pub payload_json: String,
    pub status: IngestStatus,
    pub attempts: u32,
}

/// Handle to the relational store; cheap to clone (wraps an `Arc`).
#[derive(Clone)]
pub struct RelationalStore {
    pool: Arc<ConnectionPool>,
}

impl RelationalStore {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    // ---- schedule / review_log -----------------------------------------

    pub fn get_schedule(&self, id: &str) -> Result<Option<ScheduleEntry>, PoolError> {
        self.pool.with_read(|c| {
            c.query_row(
                "SELECT id, stability, difficulty, last_review_ms, next_review_ms, \
                 review_count, promoted, projects_validated_json FROM schedule WHERE id = ?1",
                params![id],
                row_to_schedule,
            )
            .optional()
        })
    }

    /// Insert or fully overwrite a schedule entry (used after
    /// `record_review` and when replaying the log from empty state).
    pub fn put_schedule(&self, entry: &ScheduleEntry) -> Result<(), PoolError> {
        let projects_json = serde_json::to_string(&entry.projects_validated).unwrap_or_default();
        self.pool.with_writer(|c| {
            c.execute(
                "INSERT INTO schedule (id, stability, difficulty, last_review_ms, \
                 next_review_ms, review_count, promoted, projects_validated_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT(id) DO UPDATE SET \
                 stability = excluded.stability, difficulty = excluded.difficulty, \
                 last_review_ms = excluded.last_review_ms, next_review_ms = excluded.next_review_ms, \
                 review_count = excluded.review_count, promoted = excluded.promoted, \
                 projects_validated_json = excluded.projects_validated_json",
                params![
                    entry.record_id,
                    entry.stability,
                    entry.difficulty,
                    entry.last_reviewed_at.map(to_ms),
                    to_ms(entry.due_at),
                    entry.review_count,
                    entry.promoted as i64,
                    projects_json,
                ],
            )
            .map(|_| ())
        })
    }

    /// Append one row to the append-only review log. Caller commits this
    /// and `put_schedule` as one logical unit.
    pub fn append_review(
        &self,
        id: &str,
        ts: DateTime<Utc>,
        rating: Rating,
        project: Option<&str>,
    ) -> Result<(), PoolError> {
        self.pool.with_writer(|c| {
            c.execute(
                "INSERT INTO review_log (id, ts_ms, grade, project) VALUES (?1, ?2, ?3, ?4)",
                params![id, to_ms(ts), rating_str(rating), project],
            )
            .map(|_| ())
        })
    }

    /// Transactionally record a review: append the log row and upsert the
    /// resulting schedule entry in one SQLite transaction, so a crash
    /// between the two never happens.
    pub fn commit_review(
        &self,
        entry: &ScheduleEntry,
        ts: DateTime<Utc>,
        rating: Rating,
        project: Option<&str>,
    ) -> Result<(), PoolError> {
        let projects_json = serde_json::to_string(&entry.projects_validated).unwrap_or_default();
        self.pool.with_writer(|c| {
            let tx = c.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO review_log (id, ts_ms, grade, project) VALUES (?1, ?2, ?3, ?4)",
                params![entry.record_id, to_ms(ts), rating_str(rating), project],
            )?;
            tx.execute(
                "INSERT INTO schedule (id, stability, difficulty, last_review_ms, \
                 next_review_ms, review_count, promoted, projects_validated_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT(id) DO UPDATE SET \
                 stability = excluded.stability, difficulty = excluded.difficulty, \
                 last_review_ms = excluded.last_review_ms, next_review_ms = excluded.next_review_ms, \
                 review_count = excluded.review_count, promoted = excluded.promoted, \
                 projects_validated_json = excluded.projects_validated_json",
                params![
                    entry.record_id,
                    entry.stability,
                    entry.difficulty,
                    entry.last_reviewed_at.map(to_ms),
                    to_ms(entry.due_at),
                    entry.review_count,
                    entry.promoted as i64,
                    projects_json,
                ],
            )?;
            tx.commit()
        })
    }

    /// Replay the review log for `id` from empty state, producing the
    /// schedule entry it implies. The log is the source of truth; the
    /// `schedule` row is a cached projection of it.
    pub fn replay_schedule(
        &self,
        id: &str,
        params: crate::fsrs::SchedulerParams,
    ) -> Result<Option<ScheduleEntry>, PoolError> {
        let rows: Vec<(i64, String, Option<String>)> = self.pool.with_read(|c| {
            let mut stmt = c.prepare(
                "SELECT ts_ms, grade, project FROM review_log WHERE id = ?1 ORDER BY ts_ms ASC, seq ASC",
            )?;
            let rows = stmt
                .query_map(params![id], |r| {
                    Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, Option<String>>(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut entry = ScheduleEntry::new(id);
        for (ts_ms, grade, project) in rows {
            let outcome = crate::fsrs::record_review(
                entry,
                parse_rating(&grade),
                project.as_deref(),
                params,
                from_ms(ts_ms),
            );
            entry = outcome.entry;
        }
        Ok(Some(entry))
    }

    pub fn due_schedules(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<String>, PoolError> {
        let now_ms = to_ms(now);
        self.pool.with_read(|c| {
            let mut stmt = c.prepare(
                "SELECT id FROM schedule WHERE next_review_ms <= ?1 ORDER BY next_review_ms ASC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![now_ms, limit as i64], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // ---- circuit_state --------------------------------------------------

    pub fn load_circuit_state(&self, name: &str) -> Result<Option<CircuitStateRow>, PoolError> {
        self.pool.with_read(|c| {
            c.query_row(
                "SELECT state, failure_count, opened_at_ms FROM circuit_state WHERE name = ?1",
                params![name],
                |r| {
                    let state: String = r.get(0)?;
                    let failure_count: i64 = r.get(1)?;
                    let opened_at_ms: Option<i64> = r.get(2)?;
                    Ok(CircuitStateRow {
                        state: CircuitState::parse(&state),
                        failure_count: failure_count as u32,
                        opened_at: opened_at_ms.map(from_ms),
                    })
                },
            )
            .optional()
        })
    }

    pub fn save_circuit_state(
        &self,
        name: &str,
        state: CircuitState,
        failure_count: u32,
        opened_at: Option<DateTime<Utc>>,
    ) -> Result<(), PoolError> {
        self.pool.with_writer(|c| {
            c.execute(
                "INSERT INTO circuit_state (name, state, failure_count, opened_at_ms, updated_at_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(name) DO UPDATE SET \
                 state = excluded.state, failure_count = excluded.failure_count, \
                 opened_at_ms = excluded.opened_at_ms, updated_at_ms = excluded.updated_at_ms",
                params![
                    name,
                    state.as_str(),
                    failure_count,
                    opened_at.map(to_ms),
                    to_ms(Utc::now()),
                ],
            )
            .map(|_| ())
        })
    }

    // ---- event_log: audit trail ------------------------------------------

    pub fn append_event(
        &self,
        kind: &str,
        record_id: Option<&str>,
        project: Option<&str>,
        payload_json: &str,
    ) -> Result<i64, PoolError> {
        self.pool.with_writer(|c| {
            c.execute(
                "INSERT INTO event_log (ts_ms, kind, record_id, project, payload_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![to_ms(Utc::now()), kind, record_id, project, payload_json],
            )?;
            Ok(c.last_insert_rowid())
        })
    }

    pub fn recent_events(&self, limit: usize) -> Result<Vec<(i64, String, String)>, PoolError> {
        self.pool.with_read(|c| {
            let mut stmt = c.prepare(
                "SELECT seq, kind, payload_json FROM event_log ORDER BY seq DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |r| {
                    Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // ---- ingest_queue -----------------------------------------------------

    pub fn enqueue_ingest(&self, originator: &str, payload_json: &str) -> Result<i64, PoolError> {
        self.pool.with_writer(|c| {
            c.execute(
                "INSERT INTO ingest_queue (ts_ms, originator, payload_json, status, attempts) \
                 VALUES (?1, ?2, ?3, 'pending', 0)",
                params![to_ms(Utc::now()), originator, payload_json],
            )?;
            Ok(c.last_insert_rowid())
        })
    }

    /// Idempotency check: has `originator` completed within `window`?
    pub fn recent_completion_for_originator(
        &self,
        originator: &str,
        window: chrono::Duration,
    ) -> Result<Option<i64>, PoolError> {
        let cutoff = to_ms(Utc::now() - window);
        self.pool.with_read(|c| {
            c.query_row(
                "SELECT seq FROM ingest_queue WHERE originator = ?1 AND status = 'done' \
                 AND ts_ms >= ?2 ORDER BY ts_ms DESC LIMIT 1",
                params![originator, cutoff],
                |r| r.get::<_, i64>(0),
            )
            .optional()
        })
    }

    pub fn set_ingest_status(
        &self,
        seq: i64,
        status: IngestStatus,
        attempts: u32,
    ) -> Result<(), PoolError> {
        self.pool.with_writer(|c| {
            c.execute(
                "UPDATE ingest_queue SET status = ?1, attempts = ?2 WHERE seq = ?3",
                params![status.as_str(), attempts, seq],
            )
            .map(|_| ())
        })
    }

    /// Delete terminal-state (`done`/`failed`) queue rows older than
    /// `retention`; part of `maintain()`'s compaction phase.
    pub fn purge_completed_ingest(&self, retention: chrono::Duration) -> Result<usize, PoolError> {
        let cutoff = to_ms(Utc::now() - retention);
        self.pool.with_writer(|c| {
            c.execute(
                "DELETE FROM ingest_queue WHERE status IN ('done', 'failed') AND ts_ms < ?1",
                params![cutoff],
            )
        })
    }

    pub fn pending_ingest(&self, limit: usize) -> Result<Vec<IngestQueueRow>, PoolError> {
        self.pool.with_read(|c| {
            let mut stmt = c.prepare(
                "SELECT seq, ts_ms, originator, payload_json, status, attempts FROM ingest_queue \
                 WHERE status IN ('pending', 'deferred') ORDER BY seq ASC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], row_to_ingest_queue)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // ---- degraded_decisions -----------------------------------------------

    /// Record a stage-4 classification made by the degraded fallback rule
    /// instead of the model, so the nightly sweep can re-adjudicate it.
    pub fn record_degraded_decision(
        &self,
        candidate_content: &str,
        neighbor_id: &str,
        similarity: f32,
        verdict: crate::llm::Verdict,
        ts: DateTime<Utc>,
    ) -> Result<i64, PoolError> {
        self.pool.with_writer(|c| {
            c.execute(
                "INSERT INTO degraded_decisions \
                 (ts_ms, candidate_content, neighbor_id, similarity, verdict, resolved) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                params![to_ms(ts), candidate_content, neighbor_id, similarity, verdict_str(verdict)],
            )?;
            Ok(c.last_insert_rowid())
        })
    }

    pub fn pending_degraded_decisions(&self, limit: usize) -> Result<Vec<DegradedDecisionRow>, PoolError> {
        self.pool.with_read(|c| {
            let mut stmt = c.prepare(
                "SELECT seq, ts_ms, candidate_content, neighbor_id, similarity, verdict \
                 FROM degraded_decisions WHERE resolved = 0 ORDER BY seq ASC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |r| {
                    Ok(DegradedDecisionRow {
                        seq: r.get(0)?,
                        ts: from_ms(r.get::<_, i64>(1)?),
                        candidate_content: r.get(2)?,
                        neighbor_id: r.get(3)?,
                        similarity: r.get(4)?,
                        verdict: parse_verdict(&r.get::<_, String>(5)?),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn resolve_degraded_decision(&self, seq: i64) -> Result<(), PoolError> {
        self.pool.with_writer(|c| {
            c.execute("UPDATE degraded_decisions SET resolved = 1 WHERE seq = ?1", params![seq])
                .map(|_| ())
        })
    }
}

fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduleEntry> {
    let id: String = row.get(0)?;
    let stability: f64 = row.get(1)?;
    let difficulty: f64 = row.get(2)?;
    let last_review_ms: Option<i64> = row.get(3)?;
    let next_review_ms: i64 = row.get(4)?;
    let review_count: i64 = row.get(5)?;
    let promoted: i64 = row.get(6)?;
    let projects_json: String = row.get(7)?;
    let projects_validated: BTreeSet<String> = serde_json::from_str(&projects_json).unwrap_or_default();
    Ok(ScheduleEntry {
        record_id: id,
        stability,
        difficulty,
        review_count: review_count as u32,
        projects_validated,
        due_at: from_ms(next_review_ms),
        last_reviewed_at: last_review_ms.map(from_ms),
        promoted: promoted != 0,
    })
}

fn row_to_ingest_queue(row: &rusqlite::Row<'_>) -> rusqlite::Result<IngestQueueRow> {
    let seq: i64 = row.get(0)?;
    let ts_ms: i64 = row.get(1)?;
    let originator: String = row.get(2)?;
    let payload_json: String = row.get(3)?;
    let status: String = row.get(4)?;
    let attempts: i64 = row.get(5)?;
    Ok(IngestQueueRow {
        seq,
        ts: from_ms(ts_ms),
        originator,
        payload_json,
        status: IngestStatus::parse(&status),
        attempts: attempts as u32,
    })
}
