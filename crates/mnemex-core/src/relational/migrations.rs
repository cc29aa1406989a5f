//! Schema for the embedded relational store. A single forward-only
//! migration: the schema is small and stable enough that versioned up/down
//! migrations would be ceremony without payoff at this scale.

use crate::resilience::{ConnectionPool, PoolError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schedule (
    id                      TEXT PRIMARY KEY,
    stability               REAL NOT NULL,
    difficulty              REAL NOT NULL,
    last_review_ms          INTEGER,
    next_review_ms          INTEGER NOT NULL,
    review_count            INTEGER NOT NULL DEFAULT 0,
    promoted                INTEGER NOT NULL DEFAULT 0,
    projects_validated_json TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_schedule_promoted_next_review
    ON schedule (promoted, next_review_ms);

CREATE TABLE IF NOT EXISTS review_log (
    seq    INTEGER PRIMARY KEY AUTOINCREMENT,
    id     TEXT NOT NULL REFERENCES schedule (id) ON DELETE CASCADE,
    ts_ms  INTEGER NOT NULL,
    grade  TEXT NOT NULL,
    project TEXT
);

CREATE INDEX IF NOT EXISTS idx_review_log_id_ts
    ON review_log (id, ts_ms DESC);

CREATE TABLE IF NOT EXISTS circuit_state (
    name          TEXT PRIMARY KEY,
    state         TEXT NOT NULL,
    failure_count INTEGER NOT NULL DEFAULT 0,
    opened_at_ms  INTEGER,
    updated_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS event_log (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    ts_ms        INTEGER NOT NULL,
    kind         TEXT NOT NULL,
    record_id    TEXT,
    project      TEXT,
    payload_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ingest_queue (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    ts_ms        INTEGER NOT NULL,
    originator   TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'pending',
    attempts     INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_ingest_queue_originator
    ON ingest_queue (originator);

-- Gray-zone dedup/contradiction decisions made while the classification
-- circuit was open, using the deterministic fallback rule instead of the
-- model. Kept durably so the nightly maintenance sweep can re-run them
-- once the circuit has recovered (spec: "decisions made in degraded mode
-- are tagged so the nightly job can re-adjudicate them").
CREATE TABLE IF NOT EXISTS degraded_decisions (
    seq               INTEGER PRIMARY KEY AUTOINCREMENT,
    ts_ms             INTEGER NOT NULL,
    candidate_content TEXT NOT NULL,
    neighbor_id       TEXT NOT NULL,
    similarity        REAL NOT NULL,
    verdict           TEXT NOT NULL,
    resolved          INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_degraded_decisions_resolved
    ON degraded_decisions (resolved, seq);
"#;

pub fn apply(pool: &ConnectionPool) -> Result<(), PoolError> {
    pool.with_writer(|c| c.execute_batch(SCHEMA))
}
