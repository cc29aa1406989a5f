//! When to resurface a memory and when to promote it from
//! project-scope to global.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::algorithm::{
    initial_difficulty, initial_stability, next_difficulty, next_interval_days, next_stability,
};

/// The four FSRS-style grades a caller can assign on review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Fail,
    Hard,
    Good,
    Easy,
}

/// A record's scheduling state. Persisted in the `schedule` table; rebuilt
/// from the `review_log` table if ever lost (the log is the source of
/// truth).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub record_id: String,
    pub stability: f64,
    pub difficulty: f64,
    pub review_count: u32,
    pub projects_validated: BTreeSet<String>,
    pub due_at: DateTime<Utc>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub promoted: bool,
}

impl ScheduleEntry {
    /// A fresh entry created at ingestion time, due immediately.
    pub fn new(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            stability: initial_stability(Rating::Good),
            difficulty: initial_difficulty(),
            review_count: 0,
            projects_validated: BTreeSet::new(),
            due_at: Utc::now(),
            last_reviewed_at: None,
            promoted: false,
        }
    }
}

/// Outcome of `record_review`: the updated entry, plus whether this review
/// just crossed the promotion threshold (the caller emits `Promoted` and
/// flips the record's scope on `true`).
pub struct ReviewOutcome {
    pub entry: ScheduleEntry,
    pub newly_promoted: bool,
}

/// Tunables for `next_stability`/`next_interval_days` and the promotion
/// predicate, threaded from [`crate::config::SchedulerConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SchedulerParams {
    pub max_stability: f64,
    pub max_interval_days: f64,
    pub promotion_stability_threshold: f64,
    pub promotion_review_threshold: u32,
    pub promotion_project_threshold: usize,
}

impl From<crate::config::SchedulerConfig> for SchedulerParams {
    fn from(c: crate::config::SchedulerConfig) -> Self {
        Self {
            max_stability: c.max_stability,
            max_interval_days: c.max_interval_days,
            promotion_stability_threshold: c.promotion_stability_threshold,
            promotion_review_threshold: c.promotion_review_threshold,
            promotion_project_threshold: c.promotion_project_threshold,
        }
    }
}

/// Apply one review to `entry`, advancing stability/difficulty/due date
/// and the promotion predicate. Pure function over the entry; the caller
/// (the storage layer) is responsible for committing the entry and the
/// review-log append in the same transaction.
///
/// `ts` is the instant of the review, not necessarily wall-clock now — the
/// replay path feeds back the `review_log`'s own `ts_ms` so that rebuilding
/// a schedule entry from the log reproduces `due_at`/`last_reviewed_at`
/// byte-identically rather than stamping replay time (R3).
pub fn record_review(
    mut entry: ScheduleEntry,
    rating: Rating,
    reviewing_project: Option<&str>,
    params: SchedulerParams,
    ts: DateTime<Utc>,
) -> ReviewOutcome {
    entry.stability = next_stability(entry.stability, entry.difficulty, rating, params.max_stability);
    entry.difficulty = next_difficulty(entry.difficulty, rating);
    entry.review_count += 1;
    entry.last_reviewed_at = Some(ts);
    let interval_days = next_interval_days(entry.stability, params.max_interval_days);
    entry.due_at = ts + chrono::Duration::seconds((interval_days * 86_400.0) as i64);

    if let Some(project) = reviewing_project {
        entry.projects_validated.insert(project.to_string());
    }

    let was_promoted = entry.promoted;
    let qualifies = entry.stability >= params.promotion_stability_threshold
        && entry.review_count >= params.promotion_review_threshold
        && entry.projects_validated.len() >= params.promotion_project_threshold;
    if qualifies && !was_promoted {
        entry.promoted = true;
    }

    ReviewOutcome {
        newly_promoted: entry.promoted && !was_promoted,
        entry,
    }
}

/// Whether `entry` is due at `now`.
pub fn is_due(entry: &ScheduleEntry, now: DateTime<Utc>) -> bool {
    entry.due_at <= now
}
