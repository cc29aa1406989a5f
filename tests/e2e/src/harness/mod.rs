//! Shared setup for end-to-end tests: a temp-directory-backed [`Mnemex`]
//! instance wired with the deterministic embedding/language model adapters,
//! so these tests exercise real store/index/scheduler code without needing
//! network access or a vendor API key.

use std::sync::Arc;

use mnemex_core::{Config, Mnemex, NewMemory};
use mnemex_core::embeddings::DeterministicEmbeddingModel;
use mnemex_core::llm::DeterministicLanguageModel;

/// An open [`Mnemex`] instance plus the temp directory backing its store,
/// kept alive for the duration of the test.
pub struct TestEnvironment {
    pub mnemex: Mnemex,
    _dir: tempfile::TempDir,
}

impl TestEnvironment {
    /// Open a fresh instance with default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::new())
    }

    pub fn with_config(config: Config) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let embedding_model = Arc::new(DeterministicEmbeddingModel::new(config.embedding.dimensions));
        let language_model = Arc::new(DeterministicLanguageModel::new());
        let mnemex = Mnemex::open(dir.path(), config, embedding_model, language_model)
            .expect("open orchestrator");
        Self { mnemex, _dir: dir }
    }

    /// Re-open a fresh [`Mnemex`] against the same on-disk root, simulating
    /// a process restart. Consumes `self` so the old instance is dropped
    /// (and its ingestion worker runtime shut down) before the new one
    /// claims the store.
    pub fn reopen(self, config: Config) -> Self {
        let embedding_model = Arc::new(DeterministicEmbeddingModel::new(config.embedding.dimensions));
        let language_model = Arc::new(DeterministicLanguageModel::new());
        let mnemex = Mnemex::open(self._dir.path(), config, embedding_model, language_model)
            .expect("reopen orchestrator");
        Self { mnemex, _dir: self._dir }
    }
}

/// A plain fact with no project scope and default salience.
pub fn fact(content: &str) -> NewMemory {
    NewMemory::new(content)
}

/// A fact scoped to `project`.
pub fn scoped_fact(content: &str, project: &str) -> NewMemory {
    NewMemory {
        project: Some(project.to_string()),
        ..NewMemory::new(content)
    }
}
