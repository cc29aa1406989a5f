//! S1/S2/I3 from the spec's end-to-end scenarios: a fresh save is
//! searchable with default confidence, an exact-content re-save is a
//! no-op, and archiving removes a record from default search while
//! keeping it reachable by id.

use std::collections::BTreeSet;

use mnemex_core::{CommitOutcome, ListFilter, NewMemory, SearchMode, SearchOptions};
use mnemex_e2e_tests::harness::{scoped_fact, TestEnvironment};

#[test]
fn s1_new_memory_is_searchable_with_default_confidence() {
    let env = TestEnvironment::new();

    let mut new = scoped_fact("prefers dark mode in the editor", "app-alpha");
    new.tags = BTreeSet::from(["preferences".to_string(), "ui".to_string()]);
    new.salience = 0.6;

    let outcome = env.mnemex.save(new).expect("save succeeds");
    let CommitOutcome::New(record) = outcome else {
        panic!("expected a brand new record, got {outcome:?}");
    };
    assert_eq!(record.version, 1);
    assert_eq!(record.confidence, 0.5);
    assert_eq!(record.confirmations, 0);
    assert_eq!(record.contradictions, 0);

    let options = SearchOptions {
        mode: SearchMode::Hybrid,
        ..Default::default()
    };
    let response = env
        .mnemex
        .search("dark mode", 5, &options)
        .expect("search succeeds");
    assert!(
        response.hits.iter().any(|hit| hit.record.id == record.id),
        "expected the saved record to be among the hits"
    );
}

#[test]
fn s2_exact_duplicate_is_a_noop() {
    let env = TestEnvironment::new();

    let first = env
        .mnemex
        .save(scoped_fact("prefers dark mode in the editor", "app-alpha"))
        .expect("first save succeeds");
    let CommitOutcome::New(record) = first else {
        panic!("expected New on first save");
    };

    let second = env
        .mnemex
        .save(scoped_fact("prefers dark mode in the editor", "app-alpha"))
        .expect("second save succeeds");
    let CommitOutcome::Duplicate(dup) = second else {
        panic!("expected Duplicate on exact re-save, got {second:?}");
    };
    assert_eq!(dup.id, record.id);
    assert_eq!(dup.version, record.version);

    let all = env
        .mnemex
        .list(&ListFilter::default())
        .expect("list succeeds");
    assert_eq!(all.len(), 1, "exact duplicate must not create a second record");
}

#[test]
fn i3_archived_record_is_excluded_by_default_but_reachable_by_id() {
    let env = TestEnvironment::new();

    let outcome = env
        .mnemex
        .save(NewMemory::new("goes away eventually"))
        .expect("save succeeds");
    let CommitOutcome::New(record) = outcome else {
        panic!("expected New");
    };

    env.mnemex
        .archive(&record.id, "no longer relevant")
        .expect("archive succeeds");

    let default_list = env
        .mnemex
        .list(&ListFilter::default())
        .expect("list succeeds");
    assert!(default_list.is_empty(), "archived record must be excluded by default");

    let fetched = env.mnemex.get(&record.id).expect("get by id still works");
    assert!(fetched.archived);

    let including_archived = env
        .mnemex
        .list(&ListFilter {
            include_archived: true,
            ..Default::default()
        })
        .expect("list with include_archived succeeds");
    assert_eq!(including_archived.len(), 1);
}
