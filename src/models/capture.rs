//! Capture input and result types.

use super::{Domain, Memory, MemoryId, MemoryStatus, Namespace};

/// Request to capture a new memory.
#[derive(Debug, Clone, Default)]
pub struct CaptureInput {
    /// Target namespace for the memory.
    pub namespace: Namespace,
    /// One-line summary (1..=100 Unicode scalar values).
    pub summary: String,
    /// Markdown body (1..=102,400 UTF-8 bytes).
    pub content: String,
    /// Optional spec identifier.
    pub spec: Option<String>,
    /// Optional tags.
    pub tags: Vec<String>,
    /// Optional phase token.
    pub phase: Option<String>,
    /// Initial status; defaults to `active`.
    pub status: Option<MemoryStatus>,
    /// Ids of related memories.
    pub relates_to: Vec<MemoryId>,
    /// Commit-ish to attach the note to; defaults to `HEAD`.
    pub commit: Option<String>,
    /// Target domain.
    pub domain: Domain,
    /// Skip the advisory capture lock. Internal use only: callers that
    /// already hold the lock (status transitions, repair) set this.
    pub skip_lock: bool,
}

impl CaptureInput {
    /// Creates a capture input with the given summary and content.
    #[must_use]
    pub fn new(summary: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    /// Sets the namespace.
    #[must_use]
    pub const fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = namespace;
        self
    }

    /// Sets the domain.
    #[must_use]
    pub const fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = domain;
        self
    }

    /// Sets the target commit-ish.
    #[must_use]
    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Sets the spec identifier.
    #[must_use]
    pub fn with_spec(mut self, spec: impl Into<String>) -> Self {
        self.spec = Some(spec.into());
        self
    }
}

/// Result of a capture operation.
///
/// A capture that reached the note store is a success even when the derived
/// index could not be updated; `indexed` and `warning` report the difference.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    /// Whether the memory was durably written to the note store.
    pub success: bool,
    /// The captured memory.
    pub memory: Memory,
    /// Whether the derived index was updated synchronously.
    pub indexed: bool,
    /// Soft-failure detail (embedding or index trouble), if any.
    pub warning: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let input = CaptureInput::new("Use PostgreSQL", "## Context")
            .with_namespace(Namespace::Decisions)
            .with_tag("database");

        assert_eq!(input.namespace, Namespace::Decisions);
        assert_eq!(input.domain, Domain::Project);
        assert!(input.commit.is_none());
        assert!(!input.skip_lock);
        assert_eq!(input.tags, vec!["database".to_string()]);
    }
}
