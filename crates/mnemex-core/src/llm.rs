//! The language-model adapter boundary, shared by the dedup
//! filter's stage 4 classification and the ingestion pipeline's
//! extraction step. Concrete vendor and transport are out of scope
//! "Model call boundary") — this module only defines the trait object
//! shape and a deterministic reference adapter for tests and for
//! model-less operation.

use std::time::Duration;

use super::embeddings::ModelError;

/// Stage 4's classification verdict for a candidate against one neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Same,
    Update,
    Contradict,
    Unrelated,
}

/// One fact extracted from a transcript, with the "provisional salience"
/// named by the extraction step (becomes the record's initial salience).
#[derive(Debug, Clone)]
pub struct ExtractedMemory {
    pub content: String,
    pub tags: std::collections::BTreeSet<String>,
    pub salience: f64,
}

/// The vendor-agnostic boundary behind C7's circuit breaker (classification
/// call site) and C8's (extraction call site).
pub trait LanguageModel: Send + Sync {
    /// Classify `candidate` against `neighbor` as same/update/contradict/unrelated.
    fn classify(
        &self,
        candidate: &str,
        neighbor: &str,
        deadline: Duration,
    ) -> Result<Verdict, ModelError>;

    /// Extract zero or more candidate memories from a session transcript.
    fn extract(&self, transcript: &str, deadline: Duration) -> Result<Vec<ExtractedMemory>, ModelError>;

    fn name(&self) -> &'static str;
}

/// Deterministic, dependency-free reference adapter. Classification is a
/// pure function of token-overlap heuristics (never calls out); extraction
/// treats each non-blank line of a transcript as one candidate memory at
/// default salience. Used in tests and whenever no real adapter is wired in.
pub struct DeterministicLanguageModel;

impl DeterministicLanguageModel {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DeterministicLanguageModel {
    fn default() -> Self {
        Self::new()
    }
}

fn token_set(text: &str) -> std::collections::HashSet<String> {
    crate::search::tokenize(text).into_iter().collect()
}

impl LanguageModel for DeterministicLanguageModel {
    fn classify(
        &self,
        candidate: &str,
        neighbor: &str,
        _deadline: Duration,
    ) -> Result<Verdict, ModelError> {
        if candidate.trim().is_empty() || neighbor.trim().is_empty() {
            return Err(ModelError::InvalidInput("text cannot be empty".into()));
        }
        let a = token_set(candidate);
        let b = token_set(neighbor);
        let shared = a.intersection(&b).count();
        let union = a.union(&b).count().max(1);
        let overlap = shared as f64 / union as f64;

        let negation_a = a.contains("not") || a.contains("no") || a.contains("never");
        let negation_b = b.contains("not") || b.contains("no") || b.contains("never");

        if overlap > 0.4 && negation_a != negation_b {
            return Ok(Verdict::Contradict);
        }
        if overlap > 0.6 {
            return Ok(Verdict::Same);
        }
        if overlap > 0.3 {
            return Ok(Verdict::Update);
        }
        Ok(Verdict::Unrelated)
    }

    fn extract(&self, transcript: &str, _deadline: Duration) -> Result<Vec<ExtractedMemory>, ModelError> {
        let memories = transcript
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| ExtractedMemory {
                content: line.to_string(),
                tags: std::collections::BTreeSet::new(),
                salience: 0.5,
            })
            .collect();
        Ok(memories)
    }

    fn name(&self) -> &'static str {
        "deterministic-reference"
    }
}
