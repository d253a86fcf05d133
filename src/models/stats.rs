//! Index statistics and consistency verification types.

use super::MemoryId;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Aggregate statistics over one domain's index.
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    /// Total indexed memories.
    pub total: u64,
    /// Counts keyed by namespace string.
    pub by_namespace: BTreeMap<String, u64>,
    /// Counts keyed by spec identifier (unspecced memories excluded).
    pub by_spec: BTreeMap<String, u64>,
    /// Last successful sync instant, if any sync has completed.
    pub last_sync: Option<DateTime<Utc>>,
    /// On-disk size of the index database in bytes.
    pub index_size_bytes: u64,
}

/// Outcome of comparing the index against the note store.
///
/// The three sets are disjoint by construction: an id is either absent from
/// the index, absent from the notes, or present in both with diverged
/// content.
#[derive(Debug, Clone, Default)]
pub struct VerificationResult {
    /// Present in notes, missing from the index.
    pub missing_in_index: Vec<MemoryId>,
    /// Present in the index with no backing note record.
    pub orphaned_in_index: Vec<MemoryId>,
    /// Present in both, but the indexed content diverges from the note.
    pub content_mismatched: Vec<MemoryId>,
}

impl VerificationResult {
    /// Returns true when no drift was found.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.missing_in_index.is_empty()
            && self.orphaned_in_index.is_empty()
            && self.content_mismatched.is_empty()
    }

    /// Total number of drifted ids.
    #[must_use]
    pub fn drift_count(&self) -> usize {
        self.missing_in_index.len() + self.orphaned_in_index.len() + self.content_mismatched.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result_is_consistent() {
        let result = VerificationResult::default();
        assert!(result.is_consistent());
        assert_eq!(result.drift_count(), 0);
    }

    #[test]
    fn test_drift_count() {
        let result = VerificationResult {
            missing_in_index: vec![MemoryId::new("decisions:abc1234:0")],
            orphaned_in_index: vec![
                MemoryId::new("learnings:def5678:0"),
                MemoryId::new("learnings:def5678:1"),
            ],
            content_mismatched: Vec::new(),
        };
        assert!(!result.is_consistent());
        assert_eq!(result.drift_count(), 3);
    }
}
