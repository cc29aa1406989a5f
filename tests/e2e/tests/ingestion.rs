//! C8's happy path: a transcript submitted asynchronously lands as
//! stored, searchable records once a worker drains it, and a second
//! submission from the same originator within the idempotency window
//! is a no-op.

use std::time::{Duration, Instant};

use mnemex_core::ListFilter;
use mnemex_e2e_tests::harness::TestEnvironment;

/// Poll `list()` until it reports `expected` records or the deadline
/// passes — extraction runs on the pipeline's own worker pool, so the
/// records aren't necessarily visible the instant `submit_transcript`
/// returns.
fn wait_for_record_count(env: &TestEnvironment, expected: usize, timeout: Duration) -> usize {
    let deadline = Instant::now() + timeout;
    loop {
        let count = env.mnemex.list(&ListFilter::default()).expect("list succeeds").len();
        if count >= expected || Instant::now() >= deadline {
            return count;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn submitted_transcript_is_extracted_into_searchable_records() {
    let env = TestEnvironment::new();

    let transcript = "prefers tabs over spaces\nreviews code before lunch\n";
    env.mnemex
        .submit_transcript("session-alpha", transcript, Some("app-alpha".to_string()))
        .expect("submit succeeds");

    let count = wait_for_record_count(&env, 2, Duration::from_secs(5));
    assert_eq!(count, 2, "both lines of the transcript should have been extracted");

    let response = env
        .mnemex
        .search("tabs spaces", 5, &mnemex_core::SearchOptions::default())
        .expect("search succeeds");
    assert!(response.hits.iter().any(|h| h.record.content.contains("tabs")));
}

#[test]
fn resubmitting_from_the_same_originator_within_the_window_is_a_no_op() {
    let env = TestEnvironment::new();

    env.mnemex
        .submit_transcript("session-beta", "has a dentist appointment friday\n", None)
        .expect("submit succeeds");
    wait_for_record_count(&env, 1, Duration::from_secs(5));

    env.mnemex
        .submit_transcript("session-beta", "has a dentist appointment friday\n", None)
        .expect("second submit succeeds");
    // give a drain cycle a chance to run before asserting nothing changed
    std::thread::sleep(Duration::from_millis(200));

    let count = env.mnemex.list(&ListFilter::default()).expect("list succeeds").len();
    assert_eq!(count, 1, "same originator within the idempotency window must not re-ingest");
}
