//! Crash-safe single-file writes and per-record advisory locking.
//!
//! Every record write goes temp-file -> fsync -> rename -> parent-dir fsync,
//! so a reader never observes a partially written file and a crash mid-write
//! leaves either the old content or the new content, never a mix. The
//! advisory lock is a separate `.lock` file next to the record so concurrent
//! `update` calls on the same id serialize instead of racing the
//! read-modify-rename sequence.

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use fd_lock::{RwLock, RwLockWriteGuard};

use super::StoreError;

/// Write `bytes` to `path` atomically: write to `path.tmp-<random>`, fsync,
/// rename over `path`, then fsync the parent directory so the rename itself
/// is durable.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::Io(std::io::Error::other("record path has no parent")))?;
    fs::create_dir_all(parent)?;

    let tmp_path = tmp_path_for(path);
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    sync_dir(parent)?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("record");
    path.with_file_name(format!(".{file_name}.tmp-{}", std::process::id()))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), StoreError> {
    let f = File::open(dir)?;
    f.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), StoreError> {
    Ok(())
}

/// Holds an exclusive advisory lock on a record's `.lock` file for the
/// lifetime of a read-modify-write cycle in `Store::update`/`archive`.
pub struct RecordLock {
    inner: RwLock<File>,
}

impl RecordLock {
    /// Open (creating if needed) the lock file sitting next to `record_path`.
    pub fn open(record_path: &Path) -> Result<Self, StoreError> {
        let lock_path = lock_path_for(record_path);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        Ok(Self {
            inner: RwLock::new(file),
        })
    }

    /// Block until the exclusive lock is acquired.
    ///
    /// `fd-lock` only exposes a non-blocking `try_write`; contention here is
    /// per-record and brief (a single read-modify-rename), so we spin on the
    /// non-blocking call instead of failing the caller's `update`.
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<'_, File>, StoreError> {
        loop {
            match self.inner.try_write() {
                Ok(guard) => return Ok(guard),
                Err(_) => std::thread::yield_now(),
            }
        }
    }
}

fn lock_path_for(record_path: &Path) -> PathBuf {
    let file_name = record_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("record");
    record_path.with_file_name(format!("{file_name}.lock"))
}
