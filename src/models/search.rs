//! Search types, filters, and hydration levels.

use super::{Domain, Memory, MemoryStatus, Namespace};
use chrono::{DateTime, Utc};

/// Search mode for memory recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Vector similarity search only.
    Vector,
    /// BM25 text search only.
    Text,
    /// Hybrid search with RRF fusion (default).
    #[default]
    Hybrid,
}

impl SearchMode {
    /// Returns the mode as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Text => "text",
            Self::Hybrid => "hybrid",
        }
    }

    /// Parses a mode from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "vector" => Some(Self::Vector),
            "text" => Some(Self::Text),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

/// Filter criteria for memory search.
///
/// All fields are optional; an empty filter matches everything. The date
/// range is applied after fusion, the rest pre-filter each source query.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict to a namespace.
    pub namespace: Option<Namespace>,
    /// Restrict to a spec identifier.
    pub spec: Option<String>,
    /// Restrict to one domain; `None` searches all domains.
    pub domain: Option<Domain>,
    /// Restrict to a status.
    pub status: Option<MemoryStatus>,
    /// Minimum similarity score (0.0 to 1.0), vector/hybrid modes.
    pub min_similarity: Option<f32>,
    /// Inclusive lower bound on capture time.
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on capture time.
    pub date_to: Option<DateTime<Utc>>,
}

impl SearchFilter {
    /// Creates an empty filter (matches all).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            namespace: None,
            spec: None,
            domain: None,
            status: None,
            min_similarity: None,
            date_from: None,
            date_to: None,
        }
    }

    /// Restricts to a namespace.
    #[must_use]
    pub const fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// Restricts to a spec identifier.
    #[must_use]
    pub fn with_spec(mut self, spec: impl Into<String>) -> Self {
        self.spec = Some(spec.into());
        self
    }

    /// Restricts to one domain.
    #[must_use]
    pub const fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Restricts to a status.
    #[must_use]
    pub const fn with_status(mut self, status: MemoryStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the minimum similarity cutoff.
    #[must_use]
    pub const fn with_min_similarity(mut self, score: f32) -> Self {
        self.min_similarity = Some(score);
        self
    }

    /// Returns true when a memory's timestamp falls inside the date range.
    #[must_use]
    pub fn date_range_contains(&self, timestamp: DateTime<Utc>) -> bool {
        if let Some(from) = self.date_from
            && timestamp < from
        {
            return false;
        }
        if let Some(to) = self.date_to
            && timestamp > to
        {
            return false;
        }
        true
    }
}

/// A single scored hit from one retrieval source.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The matched memory.
    pub memory: Memory,
    /// Fused or single-source score.
    pub score: f32,
    /// Vector similarity if that source contributed.
    pub vector_score: Option<f32>,
    /// BM25 relevance if that source contributed.
    pub bm25_score: Option<f32>,
}

/// Progressive hydration level for a recalled memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetailLevel {
    /// Metadata and summary only (served from the index).
    #[default]
    Summary,
    /// Metadata, summary, and full body (read back from the note).
    Full,
    /// Full plus file snapshots from the backing commit.
    Files,
}

/// One file changed in a memory's backing commit.
#[derive(Debug, Clone)]
pub struct ChangedFile {
    /// Repository-relative path.
    pub path: String,
    /// File content at the backing commit, UTF-8 lossy.
    pub content: String,
}

/// A memory expanded to the requested [`DetailLevel`].
#[derive(Debug, Clone)]
pub struct HydratedMemory {
    /// The memory (body populated from the note at `Full` and above).
    pub memory: Memory,
    /// Level this hydration was served at.
    pub level: DetailLevel,
    /// Changed files of the backing commit (`Files` level only).
    pub files: Vec<ChangedFile>,
    /// Set when file hydration hit one of the resource caps.
    pub truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_mode_parse() {
        assert_eq!(SearchMode::parse("hybrid"), Some(SearchMode::Hybrid));
        assert_eq!(SearchMode::parse("VECTOR"), Some(SearchMode::Vector));
        assert_eq!(SearchMode::parse("fuzzy"), None);
    }

    #[test]
    fn test_date_range() {
        let filter = SearchFilter {
            date_from: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
            date_to: Some(Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap()),
            ..SearchFilter::new()
        };

        let inside = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

        assert!(filter.date_range_contains(inside));
        assert!(!filter.date_range_contains(before));
        assert!(!filter.date_range_contains(after));
    }

    #[test]
    fn test_empty_filter_contains_everything() {
        let filter = SearchFilter::new();
        assert!(filter.date_range_contains(Utc::now()));
    }
}
