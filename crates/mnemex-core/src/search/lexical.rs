//! BM25 over tokenized content, hand-rolled instead of routed
//! through SQLite FTS5 so `k1`/`b` and the smoothed-IDF formula stay
//! exactly what the scoring contract names, and `corpus_stats()` is a
//! first-class, introspectable operation rather than buried inside an
//! opaque ranking function.

use std::collections::HashMap;
use std::sync::RwLock;

use unicode_normalization::UnicodeNormalization;

use crate::config::Bm25Config;

/// Deterministic tokenizer: NFKC normalize, casefold, split on
/// non-alphanumeric, discard tokens shorter than 2 characters.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized: String = text.nfkc().collect::<String>().to_lowercase();
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(String::from)
        .collect()
}

/// Corpus-level statistics exposed for the dedup near-textual stage and
/// `maintain()` reporting — not consulted by the ranker's hot path, which
/// recomputes IDF from the same live state on every `search`.
#[derive(Debug, Clone)]
pub struct CorpusStats {
    pub document_count: usize,
    pub avg_doc_len: f64,
    pub document_frequency: HashMap<String, usize>,
}

struct Document {
    term_counts: HashMap<String, u32>,
    length: usize,
}

struct Inner {
    documents: HashMap<String, Document>,
    document_frequency: HashMap<String, usize>,
    total_length: usize,
}

/// In-memory inverted index with incrementally maintained document
/// frequencies.
pub struct LexicalIndex {
    config: Bm25Config,
    inner: RwLock<Inner>,
}

impl LexicalIndex {
    pub fn new(config: Bm25Config) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                documents: HashMap::new(),
                document_frequency: HashMap::new(),
                total_length: 0,
            }),
        }
    }

    pub fn insert(&self, id: &str, text: &str) {
        let tokens = tokenize(text);
        let mut term_counts: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_counts.entry(token.clone()).or_insert(0) += 1;
        }

        let mut inner = self.inner.write().unwrap();
        self.remove_locked(&mut inner, id);

        for term in term_counts.keys() {
            *inner.document_frequency.entry(term.clone()).or_insert(0) += 1;
        }
        inner.total_length += tokens.len();
        inner.documents.insert(
            id.to_string(),
            Document {
                term_counts,
                length: tokens.len(),
            },
        );
    }

    pub fn remove(&self, id: &str) {
        let mut inner = self.inner.write().unwrap();
        self.remove_locked(&mut inner, id);
    }

    fn remove_locked(&self, inner: &mut Inner, id: &str) {
        if let Some(doc) = inner.documents.remove(id) {
            inner.total_length -= doc.length;
            for term in doc.term_counts.keys() {
                if let Some(df) = inner.document_frequency.get_mut(term) {
                    *df = df.saturating_sub(1);
                    if *df == 0 {
                        inner.document_frequency.remove(term);
                    }
                }
            }
        }
    }

    /// Top-k by BM25 score. Empty query or empty corpus yields no results.
    pub fn search(&self, query: &str, k: usize) -> Vec<(String, f32)> {
        let inner = self.inner.read().unwrap();
        let n = inner.documents.len();
        if n == 0 {
            return Vec::new();
        }
        let avg_len = inner.total_length as f64 / n as f64;
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let mut idf: HashMap<&str, f64> = HashMap::new();
        for term in &query_terms {
            if idf.contains_key(term.as_str()) {
                continue;
            }
            let df = inner.document_frequency.get(term).copied().unwrap_or(0) as f64;
            let value = ((n as f64 - df + 0.5) / (df + 0.5) + 1.0).ln();
            idf.insert(term.as_str(), value);
        }

        let k1 = self.config.k1 as f64;
        let b = self.config.b as f64;

        let mut scored: Vec<(String, f32)> = inner
            .documents
            .iter()
            .filter_map(|(id, doc)| {
                let mut score = 0.0f64;
                for term in &query_terms {
                    let Some(&term_idf) = idf.get(term.as_str()) else {
                        continue;
                    };
                    let tf = *doc.term_counts.get(term).unwrap_or(&0) as f64;
                    if tf == 0.0 {
                        continue;
                    }
                    let len_norm = 1.0 - b + b * (doc.length as f64 / avg_len.max(1.0));
                    score += term_idf * (tf * (k1 + 1.0)) / (tf + k1 * len_norm);
                }
                if score > 0.0 {
                    Some((id.clone(), score as f32))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    pub fn corpus_stats(&self) -> CorpusStats {
        let inner = self.inner.read().unwrap();
        let document_count = inner.documents.len();
        let avg_doc_len = if document_count == 0 {
            0.0
        } else {
            inner.total_length as f64 / document_count as f64
        };
        CorpusStats {
            document_count,
            avg_doc_len,
            document_frequency: inner.document_frequency.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_casefolds_and_drops_short_tokens() {
        let tokens = tokenize("Dark-Mode is ON, a 2-day fix");
        assert!(tokens.contains(&"dark".to_string()));
        assert!(tokens.contains(&"mode".to_string()));
        assert!(!tokens.contains(&"a".to_string()));
        assert!(!tokens.contains(&"is".to_string()));
    }

    #[test]
    fn rare_term_outscores_stopword_heavy_query_on_equal_length_docs() {
        let index = LexicalIndex::new(Bm25Config::default());
        index.insert("common", "the quick brown fox jumps over lazy dog");
        index.insert("rare", "xylophone marmot quixotic nebula vortex plasma");
        for i in 0..20 {
            index.insert(&format!("filler-{i}"), "the quick brown fox runs fast today");
        }
        let results = index.search("xylophone", 5);
        assert_eq!(results[0].0, "rare");

        let common_results = index.search("the quick brown fox", 5);
        // every filler doc matches "the quick brown fox"; score per doc
        // should be lower than the rare-term hit since idf(the) is tiny.
        assert!(common_results[0].1 < results[0].1);
    }

    #[test]
    fn remove_drops_document_frequency_contribution() {
        let index = LexicalIndex::new(Bm25Config::default());
        index.insert("a", "unique keyword here");
        index.remove("a");
        let stats = index.corpus_stats();
        assert_eq!(stats.document_count, 0);
        assert!(stats.document_frequency.is_empty());
    }

    #[test]
    fn corpus_stats_reports_average_length() {
        let index = LexicalIndex::new(Bm25Config::default());
        index.insert("a", "one two three four");
        index.insert("b", "one two");
        let stats = index.corpus_stats();
        assert_eq!(stats.document_count, 2);
        assert!((stats.avg_doc_len - 3.0).abs() < 1e-9);
    }
}
