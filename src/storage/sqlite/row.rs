//! Row conversion utilities for the `SQLite` index.
//!
//! Maps between database rows and [`Memory`] objects, and encodes embedding
//! vectors as little-endian f32 blobs for the `memory_vectors` table.

use crate::models::{Domain, Memory, MemoryId, MemoryStatus, Namespace};
use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Internal representation of a memory row from the database.
#[derive(Debug)]
pub struct MemoryRow {
    /// Unique identifier.
    pub id: String,
    /// Full commit id the backing note is attached to.
    pub commit_id: String,
    /// Record position within the note.
    pub note_index: i64,
    /// Namespace string.
    pub namespace: String,
    /// Domain string.
    pub domain: String,
    /// One-line summary.
    pub summary: String,
    /// Markdown body.
    pub content: String,
    /// Capture instant, unix seconds.
    pub timestamp: i64,
    /// Optional spec identifier.
    pub spec: Option<String>,
    /// Optional phase token.
    pub phase: Option<String>,
    /// Comma-separated tags.
    pub tags: Option<String>,
    /// Status string.
    pub status: String,
    /// Comma-separated related ids.
    pub relates_to: Option<String>,
}

/// Column list matching [`MemoryRow`] field order, for SELECTs.
pub const MEMORY_COLUMNS: &str = "m.id, m.commit_id, m.note_index, m.namespace, m.domain, \
     m.summary, m.content, m.timestamp, m.spec, m.phase, m.tags, m.status, m.relates_to";

impl MemoryRow {
    /// Reads a row laid out as [`MEMORY_COLUMNS`].
    ///
    /// # Errors
    ///
    /// Returns a `rusqlite` error when a column is missing or mistyped.
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            commit_id: row.get(1)?,
            note_index: row.get(2)?,
            namespace: row.get(3)?,
            domain: row.get(4)?,
            summary: row.get(5)?,
            content: row.get(6)?,
            timestamp: row.get(7)?,
            spec: row.get(8)?,
            phase: row.get(9)?,
            tags: row.get(10)?,
            status: row.get(11)?,
            relates_to: row.get(12)?,
        })
    }
}

/// Converts a [`MemoryRow`] into a [`Memory`].
///
/// # Errors
///
/// Returns [`Error::Index`] when an enum column carries a value outside its
/// closed set; the row was written by us, so that means corruption.
pub fn build_memory_from_row(row: MemoryRow) -> Result<Memory> {
    let namespace = Namespace::parse(&row.namespace).ok_or_else(|| Error::Index {
        operation: "decode_row".to_string(),
        cause: format!("unknown namespace '{}' for id {}", row.namespace, row.id),
    })?;
    let domain = Domain::parse(&row.domain).ok_or_else(|| Error::Index {
        operation: "decode_row".to_string(),
        cause: format!("unknown domain '{}' for id {}", row.domain, row.id),
    })?;
    let status = MemoryStatus::parse(&row.status).ok_or_else(|| Error::Index {
        operation: "decode_row".to_string(),
        cause: format!("unknown status '{}' for id {}", row.status, row.id),
    })?;
    let timestamp = DateTime::<Utc>::from_timestamp(row.timestamp, 0).ok_or_else(|| {
        Error::Index {
            operation: "decode_row".to_string(),
            cause: format!("timestamp {} out of range for id {}", row.timestamp, row.id),
        }
    })?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let index = row.note_index.max(0) as u32;

    Ok(Memory {
        id: MemoryId::new(row.id),
        commit_id: row.commit_id,
        index,
        namespace,
        domain,
        summary: row.summary,
        content: row.content,
        timestamp,
        spec: row.spec,
        phase: row.phase,
        tags: split_csv(row.tags.as_deref()),
        status,
        relates_to: split_csv(row.relates_to.as_deref())
            .into_iter()
            .map(MemoryId::new)
            .collect(),
    })
}

/// Joins values for a CSV column; `None` for the empty list.
#[must_use]
pub fn join_csv(values: &[impl AsRef<str>]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(
            values
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

fn split_csv(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Encodes an embedding as a little-endian f32 blob.
#[must_use]
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

/// Decodes a little-endian f32 blob back into an embedding.
#[must_use]
pub fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
