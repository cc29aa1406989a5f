//! Content-hash and fingerprint helpers shared across the store, embedding
//! cache, and dedup filter.

use sha2::{Digest, Sha256};

/// SHA-256 of normalized content, truncated to 128 bits, lowercase hex.
///
/// Normalization here is limited to trimming trailing whitespace: the hash is
/// meant to catch byte-identical resubmissions (dedup's exact-match stage),
/// not near-duplicates — those are the near-textual and semantic stages.
pub fn content_hash(content: &str) -> String {
    let normalized = content.trim_end();
    let digest = Sha256::digest(normalized.as_bytes());
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Canonicalize a query string for fingerprinting: lowercase, whitespace
/// collapsed to single spaces, trimmed.
pub fn canonicalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
