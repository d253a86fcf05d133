//! Memory types and identifiers.

use super::{Domain, MemoryStatus, Namespace};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of commit-id characters embedded in a memory id.
pub const COMMIT_PREFIX_LEN: usize = 7;

/// Unique identifier for a memory: `{namespace}:{commit_prefix}:{index}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    /// Creates a memory ID from a raw string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Composes the canonical id for a record position within a note.
    #[must_use]
    pub fn compose(namespace: Namespace, commit_id: &str, index: u32) -> Self {
        let prefix = &commit_id[..commit_id.len().min(COMMIT_PREFIX_LEN)];
        Self(format!("{}:{prefix}:{index}", namespace.as_str()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the id into its `(namespace, commit_prefix, index)` parts.
    ///
    /// Returns `None` when the id is not in canonical form.
    #[must_use]
    pub fn parts(&self) -> Option<(Namespace, &str, u32)> {
        let mut pieces = self.0.splitn(3, ':');
        let namespace = Namespace::parse(pieces.next()?)?;
        let prefix = pieces.next()?;
        let index = pieces.next()?.parse().ok()?;
        Some((namespace, prefix, index))
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A captured memory entry.
///
/// Immutable once created; the only permitted mutation is an explicit status
/// transition, which rewrites the underlying note.
#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    /// Unique identifier within the owning domain.
    pub id: MemoryId,
    /// Full identifier of the commit this note is attached to.
    pub commit_id: String,
    /// Position of this record within its `(namespace, commit)` note.
    pub index: u32,
    /// The namespace this memory belongs to.
    pub namespace: Namespace,
    /// The owning domain.
    pub domain: Domain,
    /// One-line summary, 1..=100 Unicode scalar values.
    pub summary: String,
    /// Markdown body, 1..=102,400 UTF-8 bytes.
    pub content: String,
    /// Capture instant.
    pub timestamp: DateTime<Utc>,
    /// Optional short spec identifier this memory belongs to.
    pub spec: Option<String>,
    /// Optional phase token.
    pub phase: Option<String>,
    /// Ordered tags.
    pub tags: Vec<String>,
    /// Lifecycle status.
    pub status: MemoryStatus,
    /// Ids of related memories (by id string only; may cross domains).
    pub relates_to: Vec<MemoryId>,
}

impl Memory {
    /// Builds a memory for a record position, deriving the canonical id.
    #[must_use]
    pub fn at_index(
        namespace: Namespace,
        commit_id: impl Into<String>,
        index: u32,
        domain: Domain,
    ) -> Self {
        let commit_id = commit_id.into();
        Self {
            id: MemoryId::compose(namespace, &commit_id, index),
            commit_id,
            index,
            namespace,
            domain,
            summary: String::new(),
            content: String::new(),
            timestamp: Utc::now(),
            spec: None,
            phase: None,
            tags: Vec::new(),
            status: MemoryStatus::Active,
            relates_to: Vec::new(),
        }
    }
}

/// A memory returned from recall, with its fused score and owning domain.
#[derive(Debug, Clone)]
pub struct MemoryResult {
    /// The memory data.
    pub memory: Memory,
    /// Fused relevance score.
    pub score: f32,
    /// Domain the memory was found in.
    pub domain: Domain,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_id() {
        let id = MemoryId::compose(Namespace::Decisions, "abc1234def5678", 0);
        assert_eq!(id.as_str(), "decisions:abc1234:0");

        let id = MemoryId::compose(Namespace::Learnings, "abc1234def5678", 3);
        assert_eq!(id.as_str(), "learnings:abc1234:3");
    }

    #[test]
    fn test_compose_short_commit() {
        // Shorter than the prefix width: keep what we have.
        let id = MemoryId::compose(Namespace::Decisions, "abc12", 1);
        assert_eq!(id.as_str(), "decisions:abc12:1");
    }

    #[test]
    fn test_id_parts() {
        let id = MemoryId::new("progress:abc1234:2");
        let (ns, prefix, index) = id.parts().unwrap();
        assert_eq!(ns, Namespace::Progress);
        assert_eq!(prefix, "abc1234");
        assert_eq!(index, 2);

        assert!(MemoryId::new("not-an-id").parts().is_none());
        assert!(MemoryId::new("bogus:abc:0").parts().is_none());
    }

    #[test]
    fn test_at_index_derives_id() {
        let memory = Memory::at_index(Namespace::Decisions, "abc1234ff", 1, Domain::Project);
        assert_eq!(memory.id.as_str(), "decisions:abc1234:1");
        assert_eq!(memory.commit_id, "abc1234ff");
        assert_eq!(memory.index, 1);
        assert_eq!(memory.status, MemoryStatus::Active);
    }
}
