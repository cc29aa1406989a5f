//! The stability/difficulty recurrence. Deliberately smaller than a
//! full FSRS-6 fit (no optimizer, no per-user weight learning): four fixed
//! grade multipliers modulated by difficulty, enough to drive promotion and
//! resurfacing without the 21-parameter machinery a dataset-tuned scheduler
//! needs.

use super::Rating;

pub const DEFAULT_MAX_STABILITY: f64 = 10.0;
pub const DEFAULT_MAX_INTERVAL_DAYS: f64 = 365.0;
const MIN_STABILITY: f64 = 0.1;
const MIN_DIFFICULTY: f64 = 0.0;
const MAX_DIFFICULTY: f64 = 1.0;

fn grade_multiplier(rating: Rating) -> f64 {
    match rating {
        Rating::Fail => 0.5,
        Rating::Hard => 1.2,
        Rating::Good => 2.5,
        Rating::Easy => 3.5,
    }
}

fn difficulty_delta(rating: Rating) -> f64 {
    match rating {
        Rating::Fail => 0.15,
        Rating::Hard => 0.05,
        Rating::Good => 0.0,
        Rating::Easy => -0.1,
    }
}

/// `S' = clamp(S * multiplier(grade) * (1 - 0.3*difficulty), 0.1, max_stability)`.
pub fn next_stability(stability: f64, difficulty: f64, rating: Rating, max_stability: f64) -> f64 {
    let multiplier = grade_multiplier(rating) * (1.0 - 0.3 * difficulty);
    (stability * multiplier).clamp(MIN_STABILITY, max_stability)
}

/// `D' = clamp(D + delta(grade), 0, 1)`.
pub fn next_difficulty(difficulty: f64, rating: Rating) -> f64 {
    (difficulty + difficulty_delta(rating)).clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

/// Next interval in days, approximately the new stability, capped.
pub fn next_interval_days(new_stability: f64, max_interval_days: f64) -> f64 {
    new_stability.min(max_interval_days)
}

/// Starting values for a record's first schedule entry: mid-range
/// difficulty, stability proportional to the grade of the first review.
pub fn initial_stability(rating: Rating) -> f64 {
    grade_multiplier(rating).max(MIN_STABILITY)
}

pub fn initial_difficulty() -> f64 {
    0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn good_grade_grows_stability() {
        let s = next_stability(2.0, 0.5, Rating::Good, DEFAULT_MAX_STABILITY);
        assert!(s > 2.0);
    }

    #[test]
    fn fail_grade_shrinks_stability_and_raises_difficulty() {
        let s = next_stability(4.0, 0.3, Rating::Fail, DEFAULT_MAX_STABILITY);
        assert!(s < 4.0);
        let d = next_difficulty(0.3, Rating::Fail);
        assert!((d - 0.45).abs() < 1e-9);
    }

    #[test]
    fn stability_never_exceeds_max() {
        let s = next_stability(9.9, 0.0, Rating::Easy, DEFAULT_MAX_STABILITY);
        assert!(s <= DEFAULT_MAX_STABILITY);
    }

    #[test]
    fn interval_is_capped_at_max_days() {
        assert_eq!(next_interval_days(500.0, DEFAULT_MAX_INTERVAL_DAYS), 365.0);
    }

    #[test]
    fn difficulty_never_leaves_unit_range() {
        let d = next_difficulty(0.95, Rating::Fail);
        assert!(d <= 1.0);
        let d = next_difficulty(0.02, Rating::Easy);
        assert!(d >= 0.0);
    }
}
