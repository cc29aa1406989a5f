//! S5 from the spec's end-to-end scenarios: a record promotes from
//! project scope to global scope on its second review from a distinct
//! project, and `Promoted` fires exactly once.

use mnemex_core::{CommitOutcome, Rating};
use mnemex_e2e_tests::harness::{scoped_fact, TestEnvironment};

#[test]
fn s5_promotes_on_second_review_from_a_distinct_project() {
    let env = TestEnvironment::new();

    let outcome = env
        .mnemex
        .save(scoped_fact("uses four-space indentation", "app-alpha"))
        .expect("save succeeds");
    let CommitOutcome::New(record) = outcome else {
        panic!("expected New");
    };

    let mut events = env.mnemex.subscribe_events();

    let first_review = env
        .mnemex
        .review(&record.id, Rating::Good, Some("app-alpha"))
        .expect("first review succeeds");
    assert!(!first_review.newly_promoted, "must not promote on a single project");
    assert_eq!(first_review.entry.review_count, 1);

    let second_review = env
        .mnemex
        .review(&record.id, Rating::Good, Some("app-beta"))
        .expect("second review succeeds");
    assert!(second_review.newly_promoted, "two distinct projects should promote");
    assert_eq!(second_review.entry.review_count, 2);
    assert_eq!(second_review.entry.projects_validated.len(), 2);

    let promoted = env.mnemex.get(&record.id).expect("get succeeds");
    assert!(
        promoted.project.is_none(),
        "promotion clears the record's project scope"
    );

    let mut saw_promoted = 0;
    while let Ok(envelope) = events.try_recv() {
        if matches!(envelope.event, mnemex_core::Event::Promoted { .. }) {
            saw_promoted += 1;
        }
    }
    assert_eq!(saw_promoted, 1, "Promoted must fire exactly once");
}

#[test]
fn review_without_crossing_promotion_thresholds_leaves_project_scope_untouched() {
    let env = TestEnvironment::new();

    let outcome = env
        .mnemex
        .save(scoped_fact("reviews pull requests before lunch", "app-alpha"))
        .expect("save succeeds");
    let CommitOutcome::New(record) = outcome else {
        panic!("expected New");
    };

    let outcome = env
        .mnemex
        .review(&record.id, Rating::Good, Some("app-alpha"))
        .expect("review succeeds");
    assert!(!outcome.newly_promoted);

    let still_scoped = env.mnemex.get(&record.id).expect("get succeeds");
    assert_eq!(still_scoped.project.as_deref(), Some("app-alpha"));
}
