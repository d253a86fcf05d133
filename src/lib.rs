//! # Engram
//!
//! Git-native semantic memory store for software-engineering AI agents.
//!
//! Engram captures developer insights (decisions, learnings, blockers,
//! milestones) as structured notes attached to git commits, indexes them into
//! a derived `SQLite` store for hybrid semantic + lexical recall, and syncs
//! through ordinary `git push`/`git pull`. No external service is required.
//!
//! ## Architecture
//!
//! - Git notes under namespaced refs are the sole source of truth
//! - A derived index (structured rows + vector rows + FTS5) is rebuildable
//!   at any time from the notes
//! - Capture runs under an advisory file lock; index failures never lose a
//!   memory because the note is written first
//!
//! ## Example
//!
//! ```rust,ignore
//! use engram::{Container, CaptureInput, Namespace};
//!
//! let container = Container::new(config)?;
//! let capture = container.capture_service(Domain::Project)?;
//! let result = capture.capture(CaptureInput {
//!     namespace: Namespace::Decisions,
//!     summary: "Use PostgreSQL".to_string(),
//!     content: "## Context\nJSONB support".to_string(),
//!     ..Default::default()
//! })?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod cli;
pub mod config;
pub mod embedding;
pub mod git;
pub mod models;
pub mod observability;
pub mod security;
pub mod services;
pub mod storage;
pub mod subconscious;

// Re-exports for convenience
pub use config::EngramConfig;
pub use embedding::{Embedder, EmbeddingProvider};
pub use models::{
    CaptureInput, CaptureResult, DetailLevel, Domain, HydratedMemory, Memory, MemoryId,
    MemoryResult, MemoryStatus, Namespace, SearchFilter, SearchMode,
};
pub use security::{AuditLogger, SecretsFilter};
pub use services::{CaptureService, Container, RecallService, SyncService};
pub use storage::MemoryIndex;

/// Error type for engram operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
/// Every surfaced error maps to one of the spec's taxonomy kinds and carries
/// an optional recovery hint via [`Error::recovery_hint`].
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A namespace is outside the closed set
    /// - Summary or content violate size limits
    /// - A ref, commit-ish, or path argument fails sanitization
    #[error("validation failed: {0}")]
    Validation(String),

    /// The repository has no commits to attach notes to.
    #[error("repository has no commits")]
    NoCommits,

    /// Filesystem or repository permission was denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A notes ref was malformed or could not be resolved.
    #[error("invalid ref: {0}")]
    InvalidRef(String),

    /// An underlying git operation failed.
    #[error("git operation '{operation}' failed: {cause}")]
    Git {
        /// The operation that failed.
        operation: String,
        /// The underlying cause reported by libgit2.
        cause: String,
    },

    /// A note record was missing a required front-matter field.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A note record carried malformed YAML front matter.
    #[error("invalid yaml front matter: {0}")]
    InvalidYaml(String),

    /// An index (database) operation failed.
    #[error("index operation '{operation}' failed: {cause}")]
    Index {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A schema migration failed; startup must abort.
    #[error("schema migration from v{from} to v{to} failed: {cause}")]
    SchemaMigrationFailed {
        /// Schema version before the failed step.
        from: i64,
        /// Schema version the step attempted to reach.
        to: i64,
        /// The underlying cause.
        cause: String,
    },

    /// Embedding generation failed (recoverable: capture proceeds unindexed).
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// Content was blocked by the secrets policy.
    #[error("content blocked: {reason}")]
    ContentBlocked {
        /// The reason the content was blocked.
        reason: String,
    },

    /// The capture lock could not be acquired within the timeout.
    #[error("capture lock timed out after {waited_ms}ms")]
    LockTimeout {
        /// How long the caller waited before giving up.
        waited_ms: u64,
    },

    /// A status transition outside the lifecycle DAG was requested.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Hydration of a memory failed.
    #[error("hydration of '{id}' failed: {cause}")]
    Hydration {
        /// The memory being hydrated.
        id: String,
        /// The underlying cause.
        cause: String,
    },

    /// A rate limit rejected the request.
    #[error("rate limited")]
    RateLimited {
        /// Suggested wait before retrying, when the limiter knows it.
        retry_after_ms: Option<u64>,
    },
}

impl Error {
    /// Returns a short recovery hint for operator-facing output.
    #[must_use]
    pub const fn recovery_hint(&self) -> Option<&'static str> {
        match self {
            Self::NoCommits => Some("initialize the repository and create a first commit"),
            Self::PermissionDenied(_) => Some("check repository and data directory permissions"),
            Self::Index { .. } => Some("run `engram sync --mode repair`"),
            Self::SchemaMigrationFailed { .. } => {
                Some("restore the index from notes with `engram sync --mode full`")
            },
            Self::Embedding(_) => Some("text search still works; reindex once embeddings recover"),
            Self::ContentBlocked { .. } => {
                Some("redact the secret or allowlist its hash with `engram secrets allowlist add`")
            },
            Self::LockTimeout { .. } => {
                Some("another capture is in flight; retry, or remove a crashed holder's process")
            },
            Self::RateLimited { .. } => Some("wait and retry"),
            _ => None,
        }
    }

    /// Maps the error onto the CLI exit code contract.
    ///
    /// `0` success, `1` validation, `2` blocked-by-secret, `3` storage,
    /// `4` index inconsistent (returned by the sync command directly).
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_)
            | Self::InvalidRef(_)
            | Self::MissingField(_)
            | Self::InvalidYaml(_)
            | Self::InvalidTransition { .. } => 1,
            Self::ContentBlocked { .. } => 2,
            _ => 3,
        }
    }
}

/// Result type alias for engram operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Centralized to avoid duplicate implementations across the codebase.
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Validation("summary too long".to_string());
        assert_eq!(err.to_string(), "validation failed: summary too long");

        let err = Error::Git {
            operation: "append_note".to_string(),
            cause: "ref locked".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "git operation 'append_note' failed: ref locked"
        );

        let err = Error::ContentBlocked {
            reason: "aws access key".to_string(),
        };
        assert_eq!(err.to_string(), "content blocked: aws access key");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::Validation(String::new()).exit_code(), 1);
        assert_eq!(
            Error::ContentBlocked {
                reason: String::new()
            }
            .exit_code(),
            2
        );
        assert_eq!(Error::NoCommits.exit_code(), 3);
        assert_eq!(
            Error::Index {
                operation: String::new(),
                cause: String::new()
            }
            .exit_code(),
            3
        );
    }

    #[test]
    fn test_recovery_hints() {
        assert!(Error::NoCommits.recovery_hint().is_some());
        assert!(
            Error::Validation(String::new())
                .recovery_hint()
                .is_none()
        );
    }

    #[test]
    fn test_current_timestamp_is_sane() {
        // 2020-01-01 as a lower bound
        assert!(current_timestamp() > 1_577_836_800);
    }
}
