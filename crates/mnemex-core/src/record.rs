//! Memory record, version entry, and the patch/filter types the store
//! operates on.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A durable memory record.
///
/// `id` is content-derived but not reversible (it is a UUID v4, distinct from
/// the embedding cache's content-hash key — two records can share an
/// embedding entry while keeping independent identities, reinforcement
/// history, and lifecycle).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub tags: BTreeSet<String>,
    pub salience: f64,
    pub confidence: f64,
    pub confirmations: u32,
    pub contradictions: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub origin_session: Option<String>,
    pub project: Option<String>,
    pub archived: bool,
    pub version: u64,
    pub content_hash: String,
}

impl MemoryRecord {
    /// Confidence as a pure function of confirmations/contradictions.
    pub fn recompute_confidence(&mut self, confirm_step: f64, contradict_step: f64) {
        let raw = 0.5 + confirm_step * self.confirmations as f64
            - contradict_step * self.contradictions as f64;
        self.confidence = raw.clamp(0.0, 1.0);
    }
}

/// One entry in a record's version chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub version: u64,
    pub prior_content: String,
    pub timestamp: DateTime<Utc>,
    pub reason: VersionReason,
}

/// Why a version entry was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionReason {
    UserEdit,
    DedupMerge,
    ContradictionResolved,
    Rollback,
    /// Salience decayed by the maintenance sweep; no content change.
    SalienceDecay,
    /// Record promoted out of project-scope (`clear_project`); no content change.
    Promotion,
    /// Soft-delete via `Store::archive`; no content change.
    Archived,
}

impl std::fmt::Display for VersionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VersionReason::UserEdit => "user-edit",
            VersionReason::DedupMerge => "dedup-merge",
            VersionReason::ContradictionResolved => "contradiction-resolved",
            VersionReason::Rollback => "rollback",
            VersionReason::SalienceDecay => "salience-decay",
            VersionReason::Promotion => "promotion",
            VersionReason::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

/// Input to `Store::put` / the ingestion pipeline (the extraction stage's output shape).
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub content: String,
    pub tags: BTreeSet<String>,
    pub salience: f64,
    pub origin_session: Option<String>,
    pub project: Option<String>,
}

impl NewMemory {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tags: BTreeSet::new(),
            salience: 0.5,
            origin_session: None,
            project: None,
        }
    }
}

/// A partial update applied via `Store::update`.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    pub content: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub salience: Option<f64>,
    pub confirmations_delta: i64,
    pub contradictions_delta: i64,
    pub reason: VersionReason,
    /// Set on promotion: a promoted record moves from project-scope
    /// to global, independent of any content change.
    pub clear_project: bool,
}

impl Patch {
    pub fn with_reason(reason: VersionReason) -> Self {
        Self {
            reason,
            ..Default::default()
        }
    }
}

impl Default for VersionReason {
    fn default() -> Self {
        VersionReason::UserEdit
    }
}

/// Filter applied by `Store::list` (and, upstream, by the hybrid ranker after
/// scoring).
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub project: Option<String>,
    pub tags: BTreeSet<String>,
    pub min_salience: f64,
    pub include_archived: bool,
}

impl ListFilter {
    /// Whether `record` survives this filter.
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if !self.include_archived && record.archived {
            return false;
        }
        if record.salience < self.min_salience {
            return false;
        }
        if let Some(project) = &self.project {
            let scoped = record.project.as_deref() == Some(project.as_str());
            let global = record.project.is_none();
            if !scoped && !global {
                return false;
            }
        }
        if !self.tags.is_empty() && self.tags.intersection(&record.tags).next().is_none() {
            return false;
        }
        true
    }
}
