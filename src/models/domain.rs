//! Domain, namespace, and lifecycle types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Memory namespace categories.
///
/// This is a closed set: validation rejects any other value, and the
/// namespace doubles as the suffix of the notes ref
/// (`refs/notes/mem/<namespace>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Project inception notes and founding context.
    Inception,
    /// Requirements elicitation and clarified intent.
    Elicitation,
    /// Research findings and explored alternatives.
    Research,
    /// Architectural and design decisions.
    #[default]
    Decisions,
    /// Work progress and milestones.
    Progress,
    /// Blockers and impediments.
    Blockers,
    /// Review outcomes and follow-ups.
    Reviews,
    /// Lessons learned from debugging or issues.
    Learnings,
    /// Retrospective observations.
    Retrospective,
    /// Discovered patterns and conventions.
    Patterns,
}

impl Namespace {
    /// Returns all namespace variants.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Inception,
            Self::Elicitation,
            Self::Research,
            Self::Decisions,
            Self::Progress,
            Self::Blockers,
            Self::Reviews,
            Self::Learnings,
            Self::Retrospective,
            Self::Patterns,
        ]
    }

    /// Returns the namespace as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inception => "inception",
            Self::Elicitation => "elicitation",
            Self::Research => "research",
            Self::Decisions => "decisions",
            Self::Progress => "progress",
            Self::Blockers => "blockers",
            Self::Reviews => "reviews",
            Self::Learnings => "learnings",
            Self::Retrospective => "retrospective",
            Self::Patterns => "patterns",
        }
    }

    /// Parses a namespace from a string.
    ///
    /// Returns `None` for anything outside the closed set.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "inception" => Some(Self::Inception),
            "elicitation" => Some(Self::Elicitation),
            "research" => Some(Self::Research),
            "decisions" => Some(Self::Decisions),
            "progress" => Some(Self::Progress),
            "blockers" => Some(Self::Blockers),
            "reviews" => Some(Self::Reviews),
            "learnings" => Some(Self::Learnings),
            "retrospective" => Some(Self::Retrospective),
            "patterns" => Some(Self::Patterns),
            _ => None,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Domain a memory belongs to.
///
/// The `project` domain stores notes in the working repository; the `user`
/// domain stores them in a bare repository under the data directory. Each
/// domain owns its own derived index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Repository-scoped memories, synced with the project remote.
    #[default]
    Project,
    /// User-scoped memories shared across repositories.
    User,
}

impl Domain {
    /// Returns both domains in search order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Project, Self::User]
    }

    /// Returns the domain as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::User => "user",
        }
    }

    /// Parses a domain from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "project" => Some(Self::Project),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a memory entry.
///
/// Transitions follow a fixed lifecycle DAG; anything else is rejected with
/// `Error::InvalidTransition`:
///
/// ```text
/// active -> resolved -> archived -> tombstone
/// active -> archived
/// active -> tombstone
/// archived -> active      (restore)
/// tombstone -> active     (manual restore only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    /// Active and surfaced by default.
    #[default]
    Active,
    /// Resolved: the underlying concern has been addressed.
    Resolved,
    /// Archived but still addressable.
    Archived,
    /// Deleted but preserved for audit until garbage collection.
    Tombstone,
}

impl MemoryStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Resolved => "resolved",
            Self::Archived => "archived",
            Self::Tombstone => "tombstone",
        }
    }

    /// Parses a status from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "resolved" => Some(Self::Resolved),
            "archived" => Some(Self::Archived),
            "tombstone" => Some(Self::Tombstone),
            _ => None,
        }
    }

    /// Returns true when `self -> target` is an edge of the lifecycle DAG.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Active, Self::Resolved | Self::Archived | Self::Tombstone)
                | (Self::Resolved, Self::Archived)
                | (Self::Archived, Self::Tombstone | Self::Active)
                | (Self::Tombstone, Self::Active)
        )
    }
}

impl fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
