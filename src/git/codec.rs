//! Note record codec: YAML front matter plus markdown body.
//!
//! A note attached to a commit holds one or more concatenated records:
//!
//! ```text
//! ---
//! type: decisions
//! timestamp: 2026-08-01T12:00:00Z
//! summary: Use PostgreSQL
//! tags: [database]
//! status: active
//! relates_to: []
//! ---
//!
//! ## Context
//! JSONB support
//! ```
//!
//! Serialization is deterministic so records round-trip: fixed field order,
//! trailing newline after the closing delimiter, a blank line before a
//! non-empty body. Parsing tolerates concatenated appends and ignores
//! unknown front-matter keys.

use crate::models::{Domain, Memory, MemoryId, MemoryStatus, Namespace};
use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

/// One decoded note record.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteRecord {
    /// Namespace, stored as the `type` field.
    pub namespace: Namespace,
    /// Capture instant (whole seconds).
    pub timestamp: DateTime<Utc>,
    /// One-line summary.
    pub summary: String,
    /// Optional spec identifier.
    pub spec: Option<String>,
    /// Optional phase token.
    pub phase: Option<String>,
    /// Ordered tags.
    pub tags: Vec<String>,
    /// Lifecycle status.
    pub status: MemoryStatus,
    /// Related memory ids.
    pub relates_to: Vec<String>,
    /// Markdown body.
    pub body: String,
}

impl NoteRecord {
    /// Creates a record with required fields and defaults elsewhere.
    #[must_use]
    pub fn new(
        namespace: Namespace,
        timestamp: DateTime<Utc>,
        summary: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            namespace,
            timestamp,
            summary: summary.into(),
            spec: None,
            phase: None,
            tags: Vec::new(),
            status: MemoryStatus::Active,
            relates_to: Vec::new(),
            body: body.into(),
        }
    }

    /// Materializes the memory this record describes at a note position.
    #[must_use]
    pub fn to_memory(&self, commit_id: &str, index: u32, domain: Domain) -> Memory {
        Memory {
            id: MemoryId::compose(self.namespace, commit_id, index),
            commit_id: commit_id.to_string(),
            index,
            namespace: self.namespace,
            domain,
            summary: self.summary.clone(),
            content: self.body.clone(),
            timestamp: self.timestamp,
            spec: self.spec.clone(),
            phase: self.phase.clone(),
            tags: self.tags.clone(),
            status: self.status,
            relates_to: self.relates_to.iter().map(MemoryId::new).collect(),
        }
    }
}

/// Front matter as deserialized from YAML. Unknown keys are ignored.
#[derive(Debug, Deserialize)]
struct FrontMatter {
    #[serde(rename = "type")]
    kind: Option<String>,
    timestamp: Option<String>,
    summary: Option<String>,
    spec: Option<String>,
    phase: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    status: Option<String>,
    #[serde(default)]
    relates_to: Vec<String>,
}

/// Codec for note records.
pub struct NoteCodec;

impl NoteCodec {
    /// Serializes one record in canonical form.
    ///
    /// Deterministic: fixed field order, trailing newline after the closing
    /// delimiter, blank line before a non-empty body.
    #[must_use]
    pub fn serialize(record: &NoteRecord) -> String {
        let mut out = String::with_capacity(record.body.len() + 256);
        out.push_str("---\n");
        out.push_str(&format!("type: {}\n", record.namespace.as_str()));
        out.push_str(&format!(
            "timestamp: {}\n",
            record.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        out.push_str(&format!("summary: {}\n", yaml_scalar(&record.summary)));
        if let Some(spec) = &record.spec {
            out.push_str(&format!("spec: {}\n", yaml_scalar(spec)));
        }
        if let Some(phase) = &record.phase {
            out.push_str(&format!("phase: {}\n", yaml_scalar(phase)));
        }
        out.push_str(&format!("tags: {}\n", flow_list(&record.tags)));
        out.push_str(&format!("status: {}\n", record.status.as_str()));
        out.push_str(&format!("relates_to: {}\n", flow_list(&record.relates_to)));
        out.push_str("---\n");
        if !record.body.is_empty() {
            out.push('\n');
            out.push_str(&record.body);
            if !record.body.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }

    /// Serializes a sequence of records as a concatenated stream.
    #[must_use]
    pub fn serialize_many(records: &[NoteRecord]) -> String {
        let mut out = String::new();
        for record in records {
            out.push_str(&Self::serialize(record));
        }
        out
    }

    /// Parses a possibly-concatenated note text into records, in document
    /// order.
    ///
    /// A `---` line inside a body only starts a new record when it is
    /// followed by a YAML mapping carrying a `type` key and a closing
    /// delimiter; anything else stays body content.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidYaml`] for malformed front matter
    /// - [`Error::MissingField`] when `type`, `timestamp`, or `summary` is absent
    /// - [`Error::Validation`] for values outside their closed sets
    pub fn parse_many(text: &str) -> Result<Vec<NoteRecord>> {
        let lines: Vec<&str> = text.lines().collect();
        let mut records = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            let Some(yaml_end) = record_start_at(&lines, i) else {
                i += 1;
                continue;
            };

            let yaml_block = lines[i + 1..yaml_end].join("\n");
            let front: FrontMatter = serde_yaml_ng::from_str(&yaml_block)
                .map_err(|e| Error::InvalidYaml(e.to_string()))?;

            // Body runs to the start of the next record or end of stream.
            let mut body_end = lines.len();
            let mut j = yaml_end + 1;
            while j < lines.len() {
                if record_start_at(&lines, j).is_some() {
                    body_end = j;
                    break;
                }
                j += 1;
            }

            let body = body_text(&lines[yaml_end + 1..body_end]);
            records.push(build_record(front, body)?);
            i = body_end;
        }

        Ok(records)
    }
}

/// Checks whether `lines[at]` opens a record's front matter.
///
/// Returns the index of the closing delimiter when the in-between block is a
/// YAML mapping with a `type` key.
fn record_start_at(lines: &[&str], at: usize) -> Option<usize> {
    if lines.get(at).copied() != Some("---") {
        return None;
    }
    let close = lines[at + 1..]
        .iter()
        .position(|l| *l == "---")
        .map(|offset| at + 1 + offset)?;
    let block = lines[at + 1..close].join("\n");
    let parsed: std::result::Result<serde_yaml_ng::Value, _> = serde_yaml_ng::from_str(&block);
    match parsed {
        Ok(serde_yaml_ng::Value::Mapping(map)) => map
            .contains_key(serde_yaml_ng::Value::String("type".to_string()))
            .then_some(close),
        _ => None,
    }
}

/// Joins body lines, stripping the single leading blank line that
/// serialization inserts and trailing blank padding between records.
fn body_text(lines: &[&str]) -> String {
    let mut start = 0;
    if lines.first().copied() == Some("") {
        start = 1;
    }
    let mut end = lines.len();
    while end > start && lines[end - 1].is_empty() {
        end -= 1;
    }
    if start >= end {
        return String::new();
    }
    let mut body = lines[start..end].join("\n");
    body.push('\n');
    body
}

fn build_record(front: FrontMatter, body: String) -> Result<NoteRecord> {
    let kind = front
        .kind
        .ok_or_else(|| Error::MissingField("type".to_string()))?;
    let namespace = Namespace::parse(&kind)
        .ok_or_else(|| Error::Validation(format!("unknown namespace: {kind}")))?;

    let raw_timestamp = front
        .timestamp
        .ok_or_else(|| Error::MissingField("timestamp".to_string()))?;
    let timestamp = DateTime::parse_from_rfc3339(&raw_timestamp)
        .map_err(|e| Error::InvalidYaml(format!("timestamp '{raw_timestamp}': {e}")))?
        .with_timezone(&Utc);

    let summary = front
        .summary
        .ok_or_else(|| Error::MissingField("summary".to_string()))?;

    let status = match front.status {
        None => MemoryStatus::Active,
        Some(raw) => MemoryStatus::parse(&raw)
            .ok_or_else(|| Error::Validation(format!("unknown status: {raw}")))?,
    };

    Ok(NoteRecord {
        namespace,
        timestamp,
        summary,
        spec: front.spec,
        phase: front.phase,
        tags: front.tags,
        status,
        relates_to: front.relates_to,
        body,
    })
}

/// Emits a YAML scalar on a single line: plain when unambiguous, otherwise
/// double-quoted with JSON-style escapes (a valid YAML subset).
///
/// Hand-rolled instead of going through a YAML emitter so long values never
/// wrap across lines and serialization stays byte-deterministic.
fn yaml_scalar(value: &str) -> String {
    if plain_scalar_safe(value) {
        value.to_string()
    } else {
        quote_double(value)
    }
}

/// Conservative plain-scalar test: letters first, a small punctuation set,
/// no YAML indicators, no boolean/null lookalikes.
fn plain_scalar_safe(value: &str) -> bool {
    if value.is_empty() || value.starts_with(' ') || value.ends_with(' ') {
        return false;
    }
    if matches!(
        value.to_lowercase().as_str(),
        "true" | "false" | "yes" | "no" | "on" | "off" | "null" | "~"
    ) {
        return false;
    }
    let Some(first) = value.chars().next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() {
        return false;
    }
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '.' | ',' | '/' | '(' | ')' | '-'))
}

fn quote_double(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if u32::from(c) < 0x20 => out.push_str(&format!("\\u{:04x}", u32::from(c))),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Emits a flow-style list with every item double-quoted.
///
/// Memory ids contain colons; always quoting keeps items unambiguous in
/// flow context.
fn flow_list(items: &[impl AsRef<str>]) -> String {
    let quoted: Vec<String> = items
        .iter()
        .map(|item| format!("\"{}\"", item.as_ref().replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("[{}]", quoted.join(", "))
}
