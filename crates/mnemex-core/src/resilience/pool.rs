//! C9's connection pool: a single writer connection plus a round-robin pool
//! of read-only connections, all against the same WAL-mode SQLite file.
//!
//! Grounded in the single-writer-plus-read-pool split used for the
//! relational store under concurrent access: writes serialize through one
//! `Mutex<Connection>` (SQLite only ever allows one writer anyway), reads
//! fan out across a small pool so a long read never queues behind another
//! read, and WAL mode means readers see the writer's committed rows without
//! taking the write lock.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rusqlite::Connection;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("timed out acquiring a connection after {0:?}")]
    AcquireTimeout(Duration),

    #[error("writer lock poisoned")]
    Poisoned,
}

fn configure(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

/// Round-robin pool of read-only connections.
pub struct ReadPool {
    conns: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReadPool {
    fn open(path: &Path, size: usize) -> Result<Self, PoolError> {
        let mut conns = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open(path)?;
            configure(&conn)?;
            conns.push(Mutex::new(conn));
        }
        Ok(Self {
            conns,
            next: AtomicUsize::new(0),
        })
    }

    fn open_in_memory(size: usize, seed: &Connection) -> Result<Self, PoolError> {
        // A true in-memory SQLite connection is private to its handle; the
        // pool deliberately stays tiny (1) and unused in that mode (reads
        // route through the writer instead — see `ConnectionPool::with_read`).
        let _ = seed;
        let mut conns = Vec::with_capacity(size.max(1));
        for _ in 0..size.max(1) {
            let conn = Connection::open_in_memory()?;
            conns.push(Mutex::new(conn));
        }
        Ok(Self {
            conns,
            next: AtomicUsize::new(0),
        })
    }

    /// Run `f` against the next connection in rotation.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, PoolError> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        let guard = self.conns[idx].lock().map_err(|_| PoolError::Poisoned)?;
        f(&guard).map_err(PoolError::from)
    }
}

/// The full pool: one writer, a read pool, and whether the backing store
/// is a private in-memory database (in which case reads route through the
/// writer, since a private `:memory:` connection isn't shared across
/// handles).
pub struct ConnectionPool {
    writer: Mutex<Connection>,
    readers: ReadPool,
    acquire_timeout: Duration,
    in_memory: bool,
}

impl ConnectionPool {
    pub fn open(path: &Path, size: usize, acquire_timeout: Duration) -> Result<Self, PoolError> {
        let writer = Connection::open(path)?;
        configure(&writer)?;
        let readers = ReadPool::open(path, size.max(1))?;
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            acquire_timeout,
            in_memory: false,
        })
    }

    pub fn open_in_memory(size: usize, acquire_timeout: Duration) -> Result<Self, PoolError> {
        let writer = Connection::open_in_memory()?;
        configure(&writer)?;
        let readers = ReadPool::open_in_memory(size.max(1), &writer)?;
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            acquire_timeout,
            in_memory: true,
        })
    }

    /// Run `f` against the writer connection, waiting up to
    /// `acquire_timeout` for the lock.
    pub fn with_writer<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, PoolError> {
        let deadline = Instant::now() + self.acquire_timeout;
        loop {
            match self.writer.try_lock() {
                Ok(guard) => return f(&guard).map_err(PoolError::from),
                Err(std::sync::TryLockError::Poisoned(_)) => return Err(PoolError::Poisoned),
                Err(std::sync::TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(PoolError::AcquireTimeout(self.acquire_timeout));
                    }
                    std::thread::yield_now();
                }
            }
        }
    }

    /// Run `f` against a read connection, or the writer when the pool
    /// backs a private in-memory database.
    pub fn with_read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, PoolError> {
        if self.in_memory {
            self.with_writer(f)
        } else {
            self.readers.with_conn(f)
        }
    }

    pub fn readers(&self) -> &ReadPool {
        &self.readers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writer_and_reader_share_committed_state_via_wal() {
        let dir = tempdir().unwrap();
        let pool = ConnectionPool::open(&dir.path().join("t.db"), 2, Duration::from_secs(1)).unwrap();
        pool.with_writer(|c| c.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)"))
            .unwrap();
        pool.with_writer(|c| c.execute("INSERT INTO t (id) VALUES (1)", []).map(|_| ()))
            .unwrap();
        let count: i64 = pool
            .with_read(|c| c.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn in_memory_reads_route_through_writer() {
        let pool = ConnectionPool::open_in_memory(2, Duration::from_secs(1)).unwrap();
        pool.with_writer(|c| c.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)"))
            .unwrap();
        pool.with_writer(|c| c.execute("INSERT INTO t (id) VALUES (1)", []).map(|_| ()))
            .unwrap();
        let count: i64 = pool
            .with_read(|c| c.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn round_robin_cycles_across_read_connections() {
        let dir = tempdir().unwrap();
        let pool = ConnectionPool::open(&dir.path().join("t.db"), 3, Duration::from_secs(1)).unwrap();
        for _ in 0..10 {
            pool.with_read(|c| c.query_row("SELECT 1", [], |r| r.get::<_, i64>(0)))
                .unwrap();
        }
    }
}
