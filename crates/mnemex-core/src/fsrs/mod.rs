//! The scheduler. A reduced FSRS-family recurrence — four fixed
//! grade multipliers modulated by difficulty rather than a 21-parameter
//! fit — driving both resurfacing (`due_at`) and project-to-global
//! promotion.

mod algorithm;
mod scheduler;

pub use algorithm::{
    initial_difficulty, initial_stability, next_difficulty, next_interval_days, next_stability,
    DEFAULT_MAX_INTERVAL_DAYS, DEFAULT_MAX_STABILITY,
};

pub use scheduler::{is_due, record_review, Rating, ReviewOutcome, ScheduleEntry, SchedulerParams};
