//! B1-B4 from the spec's boundary cases: an empty query returns no hits
//! without erroring, `k=0` returns nothing, `k` larger than the corpus
//! is clamped to what exists, and content is accepted up to exactly
//! `max_content_bytes` and rejected one byte past it.

use mnemex_core::{Config, NewMemory, SearchOptions};
use mnemex_e2e_tests::harness::{fact, TestEnvironment};

#[test]
fn b1_empty_query_returns_no_hits_without_erroring() {
    let env = TestEnvironment::new();
    env.mnemex.save(fact("a fact about something")).expect("save succeeds");

    let response = env
        .mnemex
        .search("", 10, &SearchOptions::default())
        .expect("empty query must not error");
    assert!(response.hits.is_empty());
}

#[test]
fn b2_k_zero_returns_nothing() {
    let env = TestEnvironment::new();
    env.mnemex.save(fact("a fact about something")).expect("save succeeds");

    let response = env
        .mnemex
        .search("something", 0, &SearchOptions::default())
        .expect("k=0 must not error");
    assert!(response.hits.is_empty());
}

#[test]
fn b3_k_larger_than_corpus_returns_the_whole_corpus() {
    let env = TestEnvironment::new();
    env.mnemex.save(fact("first matching record about widgets")).expect("save succeeds");
    env.mnemex.save(fact("second matching record about widgets")).expect("save succeeds");

    let response = env
        .mnemex
        .search("widgets", 1000, &SearchOptions::default())
        .expect("search succeeds");
    assert_eq!(response.hits.len(), 2);
}

#[test]
fn b4_content_at_the_limit_is_accepted_one_byte_past_is_rejected() {
    let mut config = Config::new();
    config.max_content_bytes = 64;
    let env = TestEnvironment::with_config(config);

    let at_limit = "a".repeat(64);
    env.mnemex
        .save(NewMemory::new(at_limit))
        .expect("content exactly at the limit must be accepted");

    let over_limit = "a".repeat(65);
    let err = env
        .mnemex
        .save(NewMemory::new(over_limit))
        .expect_err("content one byte over the limit must be rejected");
    assert!(matches!(err, mnemex_core::MnemexError::InvalidInput(_)));
}
