//! Reciprocal Rank Fusion (RRF) for hybrid search.
//!
//! Rank aggregation over the BM25 and vector rankings without score
//! normalization:
//!
//! ```text
//! RRF_score(d) = sum_i( w_i / (k + rank_i(d)) )
//! ```
//!
//! `k = 60` is the standard dampening constant; `rank_i(d)` is the 1-indexed
//! position of document `d` in ranking `i`. Score ties break by timestamp
//! descending, then id ascending, so repeated queries are stable.
//!
//! Reference: Cormack, Clarke & Buettcher (2009), "Reciprocal Rank Fusion
//! outperforms Condorcet and individual Rank Learning Methods".

use crate::models::SearchHit;
use std::collections::HashMap;

/// Configuration for RRF fusion.
#[derive(Debug, Clone)]
pub struct RrfConfig {
    /// The k constant (higher dampens top ranks).
    pub k: f32,
    /// Weight applied to the vector ranking.
    pub vector_weight: f32,
    /// Weight applied to the BM25 ranking.
    pub bm25_weight: f32,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self {
            k: 60.0,
            vector_weight: 1.0,
            bm25_weight: 1.0,
        }
    }
}

/// Weighted RRF combiner.
#[derive(Debug, Clone, Default)]
pub struct RrfFusion {
    config: RrfConfig,
}

impl RrfFusion {
    /// Creates a combiner with the given configuration.
    #[must_use]
    pub const fn new(config: RrfConfig) -> Self {
        Self { config }
    }

    /// Fuses the two rankings, returning at most `limit` hits.
    ///
    /// Each input must already be ranked best-first. A hit present in both
    /// rankings keeps both of its source scores.
    #[must_use]
    pub fn fuse(
        &self,
        vector_results: &[SearchHit],
        text_results: &[SearchHit],
        limit: usize,
    ) -> Vec<SearchHit> {
        let k = self.config.k;
        let capacity = vector_results.len() + text_results.len();
        let mut fused: HashMap<&str, (f32, SearchHit)> = HashMap::with_capacity(capacity);

        for (rank, hit) in vector_results.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let contribution = self.config.vector_weight / (k + rank as f32 + 1.0);
            fused
                .entry(hit.memory.id.as_str())
                .and_modify(|(score, existing)| {
                    *score += contribution;
                    existing.vector_score = hit.vector_score;
                })
                .or_insert((contribution, hit.clone()));
        }

        for (rank, hit) in text_results.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let contribution = self.config.bm25_weight / (k + rank as f32 + 1.0);
            fused
                .entry(hit.memory.id.as_str())
                .and_modify(|(score, existing)| {
                    *score += contribution;
                    existing.bm25_score = hit.bm25_score;
                })
                .or_insert((contribution, hit.clone()));
        }

        let mut results: Vec<SearchHit> = fused
            .into_values()
            .map(|(score, mut hit)| {
                hit.score = score;
                hit
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.memory.timestamp.cmp(&a.memory.timestamp))
                .then(a.memory.id.cmp(&b.memory.id))
        });
        results.truncate(limit);
        results
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::models::{Domain, Memory, Namespace};
    use chrono::{TimeZone, Utc};

    fn hit(id_index: u32, vector: bool, score: f32) -> SearchHit {
        let mut memory =
            Memory::at_index(Namespace::Decisions, "abc1234def", id_index, Domain::Project);
        memory.timestamp = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        SearchHit {
            memory,
            score,
            vector_score: vector.then_some(score),
            bm25_score: (!vector).then_some(score),
        }
    }

    #[test]
    fn test_hit_in_both_rankings_wins() {
        let fusion = RrfFusion::default();

        let vector = vec![hit(1, true, 0.9), hit(2, true, 0.8)];
        let text = vec![hit(2, false, 5.0), hit(3, false, 4.0)];

        let fused = fusion.fuse(&vector, &text, 10);
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].memory.id.as_str(), "decisions:abc1234:2");
        // Both source scores survive the merge.
        assert!(fused[0].vector_score.is_some());
        assert!(fused[0].bm25_score.is_some());
    }

    #[test]
    fn test_weights_shift_ranking() {
        let config = RrfConfig {
            k: 60.0,
            vector_weight: 0.0,
            bm25_weight: 1.0,
        };
        let fusion = RrfFusion::new(config);

        let vector = vec![hit(1, true, 0.99)];
        let text = vec![hit(2, false, 1.0)];

        let fused = fusion.fuse(&vector, &text, 10);
        // Vector contribution zeroed out: text hit ranks first.
        assert_eq!(fused[0].memory.id.as_str(), "decisions:abc1234:2");
        assert!(fused[1].score.abs() < f32::EPSILON);
    }

    #[test]
    fn test_tie_breaks_by_timestamp_then_id() {
        let fusion = RrfFusion::default();

        let mut older = hit(1, true, 0.9);
        older.memory.timestamp = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let newer = hit(2, true, 0.9);

        // Same rank in separate calls would tie; put them at the same rank
        // position across the two rankings with equal weights.
        let fused = fusion.fuse(&[newer.clone()], &[older.clone()], 10);
        assert_eq!(fused[0].memory.id, newer.memory.id);

        // Equal timestamps: id ascending.
        let a = hit(1, true, 0.9);
        let b = hit(2, false, 0.9);
        let fused = fusion.fuse(&[a], &[b], 10);
        assert_eq!(fused[0].memory.id.as_str(), "decisions:abc1234:1");
    }

    #[test]
    fn test_empty_and_limit() {
        let fusion = RrfFusion::default();
        assert!(fusion.fuse(&[], &[], 10).is_empty());

        let vector: Vec<SearchHit> = (0..10).map(|i| hit(i, true, 0.9)).collect();
        let fused = fusion.fuse(&vector, &[], 5);
        assert_eq!(fused.len(), 5);
    }
}
