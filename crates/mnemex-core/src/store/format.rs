//! One-file-per-record text format: a metadata header of key-value lines
//! terminated by a blank line, followed by the content body verbatim.
//!
//! Unknown keys survive a read/write round trip (forward compatibility with
//! a newer writer) and every optional key tolerates being absent (backward
//! compatibility with an older writer) — see the persisted format below and
//! B-series boundary tests in `tests/e2e`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::record::MemoryRecord;

const KNOWN_KEYS: &[&str] = &[
    "id",
    "created_at",
    "updated_at",
    "version",
    "salience",
    "confidence",
    "confirmations",
    "contradictions",
    "tags",
    "project",
    "origin_session",
    "archived",
    "content_hash",
];

/// A parsed record file: the typed record plus any header lines this build
/// doesn't recognize, kept verbatim so a round trip doesn't lose them.
pub struct ParsedRecord {
    pub record: MemoryRecord,
    pub unknown_header_lines: Vec<String>,
}

/// Render `record` (plus any `unknown_header_lines` carried from a prior
/// read) into the on-disk text form.
pub fn serialize(record: &MemoryRecord, unknown_header_lines: &[String]) -> String {
    let mut header = Vec::with_capacity(KNOWN_KEYS.len() + unknown_header_lines.len());
    header.push(format!("id: {}", record.id));
    header.push(format!("created_at: {}", record.created_at.to_rfc3339()));
    header.push(format!("updated_at: {}", record.updated_at.to_rfc3339()));
    header.push(format!("version: {}", record.version));
    header.push(format!("salience: {}", record.salience));
    header.push(format!("confidence: {}", record.confidence));
    header.push(format!("confirmations: {}", record.confirmations));
    header.push(format!("contradictions: {}", record.contradictions));
    header.push(format!(
        "tags: {}",
        record.tags.iter().cloned().collect::<Vec<_>>().join(",")
    ));
    if let Some(project) = &record.project {
        header.push(format!("project: {project}"));
    }
    if let Some(origin) = &record.origin_session {
        header.push(format!("origin_session: {origin}"));
    }
    header.push(format!("archived: {}", record.archived));
    header.push(format!("content_hash: {}", record.content_hash));
    header.extend(unknown_header_lines.iter().cloned());

    let mut out = header.join("\n");
    out.push_str("\n\n");
    out.push_str(&record.content);
    out
}

/// Parse the on-disk text form. Returns [`StoreError::Corrupt`]-worthy
/// detail via a plain `String` reason; the caller (`Store`) decides whether
/// to quarantine the file.
pub fn parse(id_hint: &str, text: &str) -> Result<ParsedRecord, String> {
    let (header_block, body) = text
        .split_once("\n\n")
        .ok_or_else(|| "missing blank line separating header from content".to_string())?;

    let mut id = None;
    let mut created_at = None;
    let mut updated_at = None;
    let mut version = None;
    let mut salience = None;
    let mut confidence = None;
    let mut confirmations = 0u32;
    let mut contradictions = 0u32;
    let mut tags = BTreeSet::new();
    let mut project = None;
    let mut origin_session = None;
    let mut archived = false;
    let mut content_hash = None;
    let mut unknown_header_lines = Vec::new();

    for line in header_block.lines() {
        let Some((key, value)) = line.split_once(':') else {
            return Err(format!("malformed header line: {line:?}"));
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "id" => id = Some(value.to_string()),
            "created_at" => {
                created_at = Some(
                    DateTime::parse_from_rfc3339(value)
                        .map_err(|e| format!("bad created_at: {e}"))?
                        .with_timezone(&Utc),
                )
            }
            "updated_at" => {
                updated_at = Some(
                    DateTime::parse_from_rfc3339(value)
                        .map_err(|e| format!("bad updated_at: {e}"))?
                        .with_timezone(&Utc),
                )
            }
            "version" => {
                version = Some(value.parse::<u64>().map_err(|e| format!("bad version: {e}"))?)
            }
            "salience" => {
                salience =
                    Some(value.parse::<f64>().map_err(|e| format!("bad salience: {e}"))?)
            }
            "confidence" => {
                confidence = Some(
                    value
                        .parse::<f64>()
                        .map_err(|e| format!("bad confidence: {e}"))?,
                )
            }
            "confirmations" => {
                confirmations = value
                    .parse::<u32>()
                    .map_err(|e| format!("bad confirmations: {e}"))?
            }
            "contradictions" => {
                contradictions = value
                    .parse::<u32>()
                    .map_err(|e| format!("bad contradictions: {e}"))?
            }
            "tags" => {
                tags = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            }
            "project" if !value.is_empty() => project = Some(value.to_string()),
            "origin_session" if !value.is_empty() => origin_session = Some(value.to_string()),
            "archived" => archived = value == "true",
            "content_hash" => content_hash = Some(value.to_string()),
            _ => unknown_header_lines.push(line.to_string()),
        }
    }

    let id = id.unwrap_or_else(|| id_hint.to_string());
    let now = created_at.unwrap_or_else(Utc::now);
    let record = MemoryRecord {
        id,
        content: body.to_string(),
        tags,
        salience: salience.ok_or("missing salience")?,
        confidence: confidence.ok_or("missing confidence")?,
        confirmations,
        contradictions,
        created_at: now,
        updated_at: updated_at.unwrap_or(now),
        origin_session,
        project,
        archived,
        version: version.ok_or("missing version")?,
        content_hash: content_hash.ok_or("missing content_hash")?,
    };

    Ok(ParsedRecord {
        record,
        unknown_header_lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn sample() -> MemoryRecord {
        MemoryRecord {
            id: "rec-1".into(),
            content: "prefers dark mode".into(),
            tags: BTreeSet::from(["ui".to_string(), "preference".to_string()]),
            salience: 0.7,
            confidence: 0.5,
            confirmations: 0,
            contradictions: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            origin_session: Some("sess-1".into()),
            project: Some("app-alpha".into()),
            archived: false,
            version: 1,
            content_hash: "deadbeef".repeat(4),
        }
    }

    #[test]
    fn round_trips_through_serialize_and_parse() {
        let record = sample();
        let text = serialize(&record, &[]);
        let parsed = parse(&record.id, &text).unwrap();
        assert_eq!(parsed.record.id, record.id);
        assert_eq!(parsed.record.content, record.content);
        assert_eq!(parsed.record.tags, record.tags);
        assert_eq!(parsed.record.salience, record.salience);
        assert_eq!(parsed.record.content_hash, record.content_hash);
    }

    #[test]
    fn unknown_header_lines_survive_a_round_trip() {
        let record = sample();
        let mut text = serialize(&record, &[]);
        text = text.replacen("\n\n", "\nfuture_key: something\n\n", 1);
        let parsed = parse(&record.id, &text).unwrap();
        assert_eq!(parsed.unknown_header_lines, vec!["future_key: something"]);
        let re_emitted = serialize(&parsed.record, &parsed.unknown_header_lines);
        assert!(re_emitted.contains("future_key: something"));
    }

    #[test]
    fn missing_optional_keys_parse_cleanly() {
        let record = sample();
        let text = serialize(&record, &[]).replace("project: app-alpha\n", "");
        let parsed = parse(&record.id, &text).unwrap();
        assert_eq!(parsed.record.project, None);
    }

    #[test]
    fn missing_blank_line_is_rejected() {
        assert!(parse("rec-1", "id: rec-1\nno blank line here").is_err());
    }
}
