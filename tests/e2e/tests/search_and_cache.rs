//! P2/P4/S6: repeated identical searches return byte-identical result
//! sets, and a write that touches a fingerprint's project scope is
//! observable on the next search. Also covers the project/tags/
//! min_salience filters from §4.5's options table.

use mnemex_core::{CommitOutcome, NewMemory, OrderBy, SearchMode, SearchOptions};
use mnemex_e2e_tests::harness::{scoped_fact, TestEnvironment};

fn ids(response: &mnemex_core::SearchResponse) -> Vec<String> {
    response.hits.iter().map(|h| h.record.id.clone()).collect()
}

#[test]
fn p4_repeated_identical_search_is_byte_identical() {
    let env = TestEnvironment::new();
    env.mnemex
        .save(scoped_fact("quarterly deadline is approaching fast", "app-alpha"))
        .expect("save succeeds");
    env.mnemex
        .save(scoped_fact("team offsite scheduled for spring", "app-alpha"))
        .expect("save succeeds");

    let options = SearchOptions {
        project: Some("app-alpha".to_string()),
        ..Default::default()
    };
    let first = env
        .mnemex
        .search("deadline", 10, &options)
        .expect("first search succeeds");
    let second = env
        .mnemex
        .search("deadline", 10, &options)
        .expect("second search succeeds");

    assert_eq!(ids(&first), ids(&second));
    let first_scores: Vec<f32> = first.hits.iter().map(|h| h.score).collect();
    let second_scores: Vec<f32> = second.hits.iter().map(|h| h.score).collect();
    assert_eq!(first_scores, second_scores);
}

#[test]
fn s6_write_invalidates_cache_and_new_record_is_found_on_next_search() {
    let env = TestEnvironment::new();
    env.mnemex
        .save(scoped_fact("deadline for the alpha launch is friday", "app-alpha"))
        .expect("save succeeds");

    let options = SearchOptions {
        project: Some("app-alpha".to_string()),
        ..Default::default()
    };
    let before = env
        .mnemex
        .search("deadline", 10, &options)
        .expect("search succeeds");
    assert_eq!(before.hits.len(), 1);

    let new_outcome = env
        .mnemex
        .save(scoped_fact("new deadline policy requires manager sign-off", "app-alpha"))
        .expect("save succeeds");
    let CommitOutcome::New(new_record) = new_outcome else {
        panic!("expected New");
    };

    let after = env
        .mnemex
        .search("deadline", 10, &options)
        .expect("search succeeds");
    assert!(
        after.hits.iter().any(|h| h.record.id == new_record.id),
        "the newly saved record must be visible after cache invalidation"
    );
    assert_eq!(after.hits.len(), 2);
}

#[test]
fn project_filter_includes_global_scope_but_excludes_other_projects() {
    let env = TestEnvironment::new();
    env.mnemex
        .save(scoped_fact("alpha-only fact about the build pipeline", "app-alpha"))
        .expect("save succeeds");
    env.mnemex
        .save(scoped_fact("beta-only fact about the build pipeline", "app-beta"))
        .expect("save succeeds");
    env.mnemex
        .save(NewMemory::new("global fact about the build pipeline"))
        .expect("save succeeds");

    let options = SearchOptions {
        project: Some("app-alpha".to_string()),
        mode: SearchMode::Lexical,
        ..Default::default()
    };
    let response = env
        .mnemex
        .search("build pipeline", 10, &options)
        .expect("search succeeds");

    assert_eq!(response.hits.len(), 2, "expected alpha-scoped + global, not beta");
    assert!(response
        .hits
        .iter()
        .all(|h| h.record.project.as_deref() != Some("app-beta")));
}

#[test]
fn min_salience_filters_out_low_salience_records() {
    let env = TestEnvironment::new();
    let mut low = NewMemory::new("a minor detail about font choice");
    low.salience = 0.1;
    env.mnemex.save(low).expect("save succeeds");

    let mut high = NewMemory::new("a major decision about font choice");
    high.salience = 0.9;
    env.mnemex.save(high).expect("save succeeds");

    let options = SearchOptions {
        min_salience: 0.5,
        mode: SearchMode::Lexical,
        order: OrderBy::Salience,
        ..Default::default()
    };
    let response = env
        .mnemex
        .search("font choice", 10, &options)
        .expect("search succeeds");
    assert_eq!(response.hits.len(), 1);
    assert!(response.hits[0].record.salience >= 0.5);
}
