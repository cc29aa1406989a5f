//! The embedded relational store: `schedule`, `review_log`,
//! `circuit_state`, `event_log`, and `ingest_queue` live here as rows in a
//! WAL-mode SQLite database accessed through [`crate::resilience::ConnectionPool`].
//! Memory records themselves never touch this file — those are the
//! file-per-record tree C1 owns directly.

mod migrations;
mod schedule;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use schedule::{CircuitStateRow, IngestQueueRow, IngestStatus, RelationalStore};

use crate::resilience::{ConnectionPool, PoolError};

/// Open (or create) the relational database at `path`, applying migrations
/// and running the startup `PRAGMA integrity_check`.
pub fn open(
    path: &Path,
    pool_size: usize,
    acquire_timeout: Duration,
) -> Result<RelationalStore, PoolError> {
    let pool = Arc::new(ConnectionPool::open(path, pool_size, acquire_timeout)?);
    migrations::apply(&pool)?;
    Ok(RelationalStore::new(pool))
}

/// An in-memory database, used by tests and by embedding-less smoke runs.
/// `PRAGMA integrity_check` is skipped: a private `:memory:` database cannot
/// have been corrupted by a prior process.
pub fn open_in_memory(pool_size: usize, acquire_timeout: Duration) -> Result<RelationalStore, PoolError> {
    let pool = Arc::new(ConnectionPool::open_in_memory(pool_size, acquire_timeout)?);
    migrations::apply(&pool)?;
    Ok(RelationalStore::new(pool))
}

/// Run `PRAGMA integrity_check` (startup and daily schedule). On
/// failure the caller is expected to quarantine the file and trigger
/// restore-from-backup rather than continue serving (see `IntegrityFailure`).
pub fn integrity_check(pool: &ConnectionPool) -> Result<bool, PoolError> {
    let result: String = pool.with_writer(|c| c.query_row("PRAGMA integrity_check", [], |r| r.get(0)))?;
    Ok(result == "ok")
}
