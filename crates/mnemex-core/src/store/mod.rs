//! The durable record store.
//!
//! Records live one-per-file under `<root>/records/<id>.rec`; each version
//! superseded by `update` is appended to `<root>/versions/<id>/<version>.rec`
//! before the new content is written, so a crash between the version write
//! and the head rewrite can only lose the *newest* edit, never the history.
//! Corrupt files are moved aside into `<root>/quarantine/` rather than
//! failing the whole store open.

mod atomic;
mod format;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use uuid::Uuid;

use crate::record::{ListFilter, MemoryRecord, NewMemory, Patch, VersionEntry, VersionReason};

use atomic::{write_atomic, RecordLock};

/// Errors raised by the store. Kept narrow so callers can match on it
/// directly; `MnemexError::StoreError` wraps it for the public surface.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("stale write on {id}: expected version {expected}, found {found}")]
    StaleWrite {
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("content exceeds max_content_bytes ({limit}): {actual}")]
    ContentTooLarge { limit: usize, actual: usize },
}

/// The on-disk record store. Each mutation opens a fresh per-record
/// `RecordLock` to guard its read-modify-rename cycle; `list` and other
/// cross-record reads never lock, since they only ever see committed
/// (renamed) files.
pub struct Store {
    root: PathBuf,
    max_content_bytes: usize,
    max_versions_retained: usize,
    confidence_confirm_step: f64,
    confidence_contradict_step: f64,
}

impl Store {
    /// Open (creating directories as needed) a store rooted at `root`.
    pub fn open(
        root: impl Into<PathBuf>,
        max_content_bytes: usize,
        max_versions_retained: usize,
    ) -> Result<Self, StoreError> {
        Self::open_with_confidence_steps(root, max_content_bytes, max_versions_retained, 0.1, 0.15)
    }

    /// Same as [`Store::open`] but with explicit confidence-recompute
    /// steps (see [`crate::config::DedupConfig`]'s `confidence_confirm_step`
    /// / `confidence_contradict_step`).
    pub fn open_with_confidence_steps(
        root: impl Into<PathBuf>,
        max_content_bytes: usize,
        max_versions_retained: usize,
        confidence_confirm_step: f64,
        confidence_contradict_step: f64,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join("records"))?;
        fs::create_dir_all(root.join("versions"))?;
        fs::create_dir_all(root.join("quarantine"))?;
        Ok(Self {
            root,
            max_content_bytes,
            max_versions_retained,
            confidence_confirm_step,
            confidence_contradict_step,
        })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join("records").join(format!("{id}.rec"))
    }

    fn versions_dir(&self, id: &str) -> PathBuf {
        self.root.join("versions").join(id)
    }

    fn lock_for(&self, id: &str) -> Result<RecordLock, StoreError> {
        RecordLock::open(&self.record_path(id))
    }

    fn check_content_len(&self, content: &str) -> Result<(), StoreError> {
        if content.len() > self.max_content_bytes {
            return Err(StoreError::ContentTooLarge {
                limit: self.max_content_bytes,
                actual: content.len(),
            });
        }
        Ok(())
    }

    /// Create a new record. The id is assigned here (a v4 UUID) and is
    /// independent of the embedding cache's content-hash key.
    pub fn put(&self, new: NewMemory) -> Result<MemoryRecord, StoreError> {
        self.check_content_len(&new.content)?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let record = MemoryRecord {
            id: id.clone(),
            content_hash: crate::hashing::content_hash(&new.content),
            content: new.content,
            tags: new.tags,
            salience: new.salience.clamp(0.0, 1.0),
            confidence: 0.5,
            confirmations: 0,
            contradictions: 0,
            created_at: now,
            updated_at: now,
            origin_session: new.origin_session,
            project: new.project,
            archived: false,
            version: 1,
        };

        let mut lock = self.lock_for(&id)?;
        let _guard = lock.lock()?;
        let text = format::serialize(&record, &[]);
        write_atomic(&self.record_path(&id), text.as_bytes())?;
        Ok(record)
    }

    /// Read the current head of a record, quarantining the file if it
    /// fails to parse.
    pub fn get(&self, id: &str) -> Result<MemoryRecord, StoreError> {
        self.read_head(id).map(|parsed| parsed.record)
    }

    fn read_head(&self, id: &str) -> Result<format::ParsedRecord, StoreError> {
        let path = self.record_path(id);
        let text = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(id.to_string())
            } else {
                StoreError::Io(e)
            }
        })?;
        match format::parse(id, &text) {
            Ok(parsed) => Ok(parsed),
            Err(reason) => {
                self.quarantine(id, &text);
                Err(StoreError::Corrupt {
                    id: id.to_string(),
                    reason,
                })
            }
        }
    }

    fn quarantine(&self, id: &str, text: &str) {
        let dest = self
            .root
            .join("quarantine")
            .join(format!("{id}-{}.rec", Utc::now().timestamp()));
        let _ = fs::write(dest, text);
    }

    /// Apply `patch` to `id`, enforcing that `expected_version` matches the
    /// current head (optimistic concurrency — `StaleWrite` otherwise). The
    /// prior content is appended to the version chain before the head is
    /// rewritten.
    pub fn update(
        &self,
        id: &str,
        expected_version: u64,
        patch: Patch,
    ) -> Result<MemoryRecord, StoreError> {
        let mut lock = self.lock_for(id)?;
        let _guard = lock.lock()?;

        let parsed = self.read_head(id)?;
        let mut record = parsed.record;
        if record.version != expected_version {
            return Err(StoreError::StaleWrite {
                id: id.to_string(),
                expected: expected_version,
                found: record.version,
            });
        }

        if let Some(content) = &patch.content {
            self.check_content_len(content)?;
        }

        let prior_content = record.content.clone();

        if let Some(content) = patch.content {
            record.content_hash = crate::hashing::content_hash(&content);
            record.content = content;
        }
        if let Some(tags) = patch.tags {
            record.tags = tags;
        }
        if let Some(salience) = patch.salience {
            record.salience = salience.clamp(0.0, 1.0);
        }
        if patch.clear_project {
            record.project = None;
        }
        if patch.confirmations_delta != 0 {
            record.confirmations =
                (record.confirmations as i64 + patch.confirmations_delta).max(0) as u32;
        }
        if patch.contradictions_delta != 0 {
            record.contradictions =
                (record.contradictions as i64 + patch.contradictions_delta).max(0) as u32;
        }
        // Confidence is always a pure function of these two counters.
        record.recompute_confidence(self.confidence_confirm_step, self.confidence_contradict_step);
        record.updated_at = Utc::now();
        record.version += 1;

        // A version entry is appended on every mutation, content-changing or
        // not, so the chain stays dense and gapless from 1 regardless of
        // what kind of update a record happens to see first.
        self.append_version(id, record.version - 1, &prior_content, patch.reason)?;

        let text = format::serialize(&record, &parsed.unknown_header_lines);
        write_atomic(&self.record_path(id), text.as_bytes())?;
        Ok(record)
    }

    fn append_version(
        &self,
        id: &str,
        prior_version: u64,
        prior_content: &str,
        reason: VersionReason,
    ) -> Result<(), StoreError> {
        let dir = self.versions_dir(id);
        fs::create_dir_all(&dir)?;
        let entry = VersionEntry {
            version: prior_version,
            prior_content: prior_content.to_string(),
            timestamp: Utc::now(),
            reason,
        };
        let path = dir.join(format!("{prior_version}.json"));
        let bytes = serde_json::to_vec_pretty(&entry)
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
        write_atomic(&path, &bytes)?;
        self.prune_versions(id)
    }

    fn prune_versions(&self, id: &str) -> Result<(), StoreError> {
        let dir = self.versions_dir(id);
        let mut entries: Vec<(u64, PathBuf)> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                let stem = path.file_stem()?.to_str()?;
                stem.parse::<u64>().ok().map(|v| (v, path))
            })
            .collect();
        if entries.len() <= self.max_versions_retained {
            return Ok(());
        }
        entries.sort_by_key(|(v, _)| *v);
        let excess = entries.len() - self.max_versions_retained;
        let pruned: Vec<u64> = entries.iter().take(excess).map(|(v, _)| *v).collect();
        for (_, path) in entries.into_iter().take(excess) {
            let _ = fs::remove_file(path);
        }
        self.append_pruned_manifest(id, &pruned)
    }

    /// The implementation prunes to the last N versions per record, but
    /// must keep a manifest of what was pruned." One append-only JSON-lines
    /// file per record, next to its version chain, so a pruned version
    /// number is never silently unaccounted for.
    fn append_pruned_manifest(&self, id: &str, pruned: &[u64]) -> Result<(), StoreError> {
        if pruned.is_empty() {
            return Ok(());
        }
        let path = self.versions_dir(id).join("pruned-manifest.jsonl");
        let mut existing = fs::read_to_string(&path).unwrap_or_default();
        let now = Utc::now();
        for version in pruned {
            existing.push_str(&format!(
                r#"{{"version":{version},"pruned_at":"{}"}}"#,
                now.to_rfc3339()
            ));
            existing.push('\n');
        }
        write_atomic(&path, existing.as_bytes())
    }

    /// Version numbers pruned from `id`'s chain so far (the manifest
    /// requires), oldest first.
    pub fn pruned_versions(&self, id: &str) -> Result<Vec<u64>, StoreError> {
        let path = self.versions_dir(id).join("pruned-manifest.jsonl");
        let Ok(text) = fs::read_to_string(&path) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for line in text.lines() {
            if let Some(v) = line
                .split("\"version\":")
                .nth(1)
                .and_then(|rest| rest.split(',').next())
                .and_then(|s| s.trim().parse::<u64>().ok())
            {
                out.push(v);
            }
        }
        Ok(out)
    }

    /// List version entries for `id`, oldest first.
    pub fn versions(&self, id: &str) -> Result<Vec<VersionEntry>, StoreError> {
        let dir = self.versions_dir(id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries: Vec<VersionEntry> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let bytes = fs::read(entry.path())?;
            if let Ok(parsed) = serde_json::from_slice::<VersionEntry>(&bytes) {
                entries.push(parsed);
            }
        }
        entries.sort_by_key(|e| e.version);
        Ok(entries)
    }

    /// Mark `id` archived without deleting it (soft delete; hard delete is
    /// no hard delete).
    pub fn archive(&self, id: &str) -> Result<MemoryRecord, StoreError> {
        let mut lock = self.lock_for(id)?;
        let _guard = lock.lock()?;
        let parsed = self.read_head(id)?;
        let mut record = parsed.record;
        let prior_content = record.content.clone();
        record.archived = true;
        record.updated_at = Utc::now();
        record.version += 1;
        self.append_version(id, record.version - 1, &prior_content, VersionReason::Archived)?;
        let text = format::serialize(&record, &parsed.unknown_header_lines);
        write_atomic(&self.record_path(id), text.as_bytes())?;
        Ok(record)
    }

    /// List every record passing `filter`. Used by exact-ingest lookups,
    /// maintenance sweeps, and the dedup candidate gather; the hybrid
    /// ranker's hot path goes through the in-memory indexes instead.
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<MemoryRecord>, StoreError> {
        let dir = self.root.join("records");
        let mut out = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("rec") {
                continue;
            }
            let id = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            match self.read_head(id) {
                Ok(parsed) if filter.matches(&parsed.record) => out.push(parsed.record),
                Ok(_) => {}
                Err(StoreError::Corrupt { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// All non-archived record ids, used to rebuild in-memory indexes at
    /// startup.
    pub fn all_ids(&self) -> Result<BTreeSet<String>, StoreError> {
        let filter = ListFilter {
            include_archived: true,
            ..Default::default()
        };
        Ok(self.list(&filter)?.into_iter().map(|r| r.id).collect())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open a store with generous test defaults (1 MiB content cap, 10
    /// retained versions) rooted at `root`.
    #[doc(hidden)]
    pub fn new_for_test(root: impl Into<PathBuf>) -> Self {
        Self::open(root, 1024 * 1024, 10).expect("test store should open")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), 64 * 1024, 10).unwrap();
        (dir, store)
    }

    #[test]
    fn put_then_get_round_trips() {
        let (_dir, store) = store();
        let record = store.put(NewMemory::new("prefers dark mode")).unwrap();
        let fetched = store.get(&record.id).unwrap();
        assert_eq!(fetched.content, "prefers dark mode");
        assert_eq!(fetched.version, 1);
        assert_eq!(fetched.confidence, 0.5);
    }

    #[test]
    fn update_bumps_version_and_appends_history() {
        let (_dir, store) = store();
        let record = store.put(NewMemory::new("v1")).unwrap();
        let patch = Patch {
            content: Some("v2".to_string()),
            ..Patch::with_reason(VersionReason::UserEdit)
        };
        let updated = store.update(&record.id, record.version, patch).unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.content, "v2");
        let versions = store.versions(&record.id).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].prior_content, "v1");
    }

    #[test]
    fn stale_write_is_rejected() {
        let (_dir, store) = store();
        let record = store.put(NewMemory::new("v1")).unwrap();
        let patch = Patch {
            content: Some("v2".to_string()),
            ..Default::default()
        };
        let err = store.update(&record.id, 999, patch).unwrap_err();
        assert!(matches!(err, StoreError::StaleWrite { .. }));
    }

    #[test]
    fn archive_is_soft_and_excluded_from_default_list() {
        let (_dir, store) = store();
        let record = store.put(NewMemory::new("goes away")).unwrap();
        store.archive(&record.id).unwrap();
        let visible = store.list(&ListFilter::default()).unwrap();
        assert!(visible.is_empty());
        let all = store
            .list(&ListFilter {
                include_archived: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].archived);
    }

    #[test]
    fn archive_appends_a_version_entry() {
        let (_dir, store) = store();
        let record = store.put(NewMemory::new("goes away")).unwrap();
        let archived = store.archive(&record.id).unwrap();
        assert_eq!(archived.version, 2);
        let versions = store.versions(&record.id).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, 1);
        assert_eq!(versions[0].reason, VersionReason::Archived);
    }

    #[test]
    fn non_content_update_still_appends_a_dense_version_entry() {
        let (_dir, store) = store();
        let record = store.put(NewMemory::new("stable content")).unwrap();
        let patch = Patch {
            salience: Some(0.2),
            ..Patch::with_reason(VersionReason::SalienceDecay)
        };
        let updated = store.update(&record.id, record.version, patch).unwrap();
        assert_eq!(updated.version, 2);
        let versions = store.versions(&record.id).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, 1);
        assert_eq!(versions[0].prior_content, "stable content");
        assert_eq!(versions[0].reason, VersionReason::SalienceDecay);

        // A content edit afterwards keeps the chain dense, not just pruned-aware.
        let patch2 = Patch {
            content: Some("edited content".to_string()),
            ..Patch::with_reason(VersionReason::UserEdit)
        };
        let updated2 = store.update(&record.id, updated.version, patch2).unwrap();
        assert_eq!(updated2.version, 3);
        let versions2 = store.versions(&record.id).unwrap();
        assert_eq!(versions2.len(), 2);
        assert_eq!(versions2[1].version, 2);
        assert_eq!(versions2[1].prior_content, "stable content");
    }

    #[test]
    fn content_over_limit_is_rejected() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), 8, 10).unwrap();
        let err = store
            .put(NewMemory::new("way too long for eight bytes"))
            .unwrap_err();
        assert!(matches!(err, StoreError::ContentTooLarge { .. }));
    }

    #[test]
    fn version_pruning_keeps_only_max_versions_retained() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), 64 * 1024, 2).unwrap();
        let mut record = store.put(NewMemory::new("v0")).unwrap();
        for i in 1..=4 {
            let patch = Patch {
                content: Some(format!("v{i}")),
                ..Default::default()
            };
            record = store.update(&record.id, record.version, patch).unwrap();
        }
        let versions = store.versions(&record.id).unwrap();
        assert_eq!(versions.len(), 2);
        let pruned = store.pruned_versions(&record.id).unwrap();
        assert_eq!(pruned, vec![1, 2]);
    }
}
