//! Memory recall service.
//!
//! Three search modes over each domain's index: vector similarity, BM25
//! text, and hybrid (both rankings fused with weighted RRF). Cross-domain
//! searches merge per-domain results by fused score. Hydration expands a
//! result progressively: summary from the index, body from the note, then
//! file snapshots from the backing commit under hard resource caps.

use super::container::DomainStack;
use super::rrf::{RrfConfig, RrfFusion};
use crate::config::HybridConfig;
use crate::embedding::EmbeddingProvider;
use crate::git::NoteCodec;
use crate::models::{
    DetailLevel, Domain, HydratedMemory, Memory, MemoryId, MemoryResult, SearchFilter, SearchHit,
    SearchMode,
};
use crate::storage::MemoryIndex;
use crate::{Error, Result};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::instrument;

/// Hydration cap: files per commit.
pub const MAX_HYDRATED_FILES: usize = 50;
/// Hydration cap: bytes per file.
pub const MAX_HYDRATED_FILE_BYTES: usize = 512 * 1024;
/// Hydration cap: total bytes per hydration.
pub const MAX_HYDRATED_TOTAL_BYTES: usize = 5 * 1024 * 1024;

/// Query embeddings cached per service instance.
const QUERY_CACHE_SIZE: usize = 64;

/// Over-fetch multiplier for post-filtering headroom.
const OVERFETCH: usize = 3;

/// Service for searching and hydrating memories.
pub struct RecallService {
    hybrid: HybridConfig,
    embedder: Arc<EmbeddingProvider>,
    stacks: Vec<DomainStack>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl RecallService {
    /// Assembles a recall service over one or more domain stacks.
    #[must_use]
    pub fn new(
        hybrid: HybridConfig,
        embedder: Arc<EmbeddingProvider>,
        stacks: Vec<DomainStack>,
    ) -> Self {
        #[allow(clippy::unwrap_used)] // non-zero literal
        let capacity = NonZeroUsize::new(QUERY_CACHE_SIZE).unwrap();
        Self {
            hybrid,
            embedder,
            stacks,
            query_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Searches all configured domains.
    ///
    /// With more than one domain, per-domain results merge by score with
    /// ties broken by timestamp descending then id ascending.
    ///
    /// # Errors
    ///
    /// Surfaces [`Error::Index`] failures. Embedding failures degrade:
    /// vector mode returns empty, hybrid falls back to the text ranking.
    #[instrument(skip(self, filter), fields(mode = mode.as_str(), k))]
    pub fn search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
        mode: SearchMode,
    ) -> Result<Vec<MemoryResult>> {
        let mut merged: Vec<MemoryResult> = Vec::new();
        for stack in self.stacks_for(filter.domain) {
            let hits = self.search_domain(stack, query, k, filter, mode)?;
            merged.extend(hits.into_iter().map(|hit| MemoryResult {
                score: hit.score,
                domain: stack.domain,
                memory: hit.memory,
            }));
        }

        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.memory.timestamp.cmp(&a.memory.timestamp))
                .then(a.memory.id.cmp(&b.memory.id))
        });
        merged.truncate(k);
        Ok(merged)
    }

    fn stacks_for(&self, domain: Option<Domain>) -> impl Iterator<Item = &DomainStack> {
        self.stacks
            .iter()
            .filter(move |stack| domain.is_none_or(|d| stack.domain == d))
    }

    fn search_domain(
        &self,
        stack: &DomainStack,
        query: &str,
        k: usize,
        filter: &SearchFilter,
        mode: SearchMode,
    ) -> Result<Vec<SearchHit>> {
        let fetch = OVERFETCH * k.max(1);
        let hits = match mode {
            SearchMode::Vector => {
                let Some(embedding) = self.query_embedding(query) else {
                    return Ok(Vec::new());
                };
                self.vector_hits(&stack.index, &embedding, fetch, filter)?
            },
            SearchMode::Text => self.text_hits(&stack.index, query, fetch, filter)?,
            SearchMode::Hybrid => {
                let embedding = self.query_embedding(query);
                let (vector_hits, text_hits) = if self.hybrid.enable_parallel
                    && embedding.is_some()
                {
                    self.parallel_source_queries(
                        &stack.index,
                        query,
                        embedding.as_deref(),
                        fetch,
                        filter,
                    )?
                } else {
                    let vector_hits = match embedding.as_deref() {
                        Some(v) => self.vector_hits(&stack.index, v, fetch, filter)?,
                        None => Vec::new(),
                    };
                    let text_hits = self.text_hits(&stack.index, query, fetch, filter)?;
                    (vector_hits, text_hits)
                };

                let fusion = RrfFusion::new(RrfConfig {
                    k: self.hybrid.rrf_k,
                    vector_weight: self.hybrid.vector_weight,
                    bm25_weight: self.hybrid.bm25_weight,
                });
                fusion.fuse(&vector_hits, &text_hits, fetch)
            },
        };

        // Date range is applied after fusion.
        let mut hits: Vec<SearchHit> = hits
            .into_iter()
            .filter(|hit| filter.date_range_contains(hit.memory.timestamp))
            .collect();
        hits.truncate(k);
        Ok(hits)
    }

    /// Runs the two hybrid source queries on separate threads.
    fn parallel_source_queries(
        &self,
        index: &Arc<MemoryIndex>,
        query: &str,
        embedding: Option<&[f32]>,
        fetch: usize,
        filter: &SearchFilter,
    ) -> Result<(Vec<SearchHit>, Vec<SearchHit>)> {
        std::thread::scope(|scope| {
            let vector_handle = embedding.map(|embedding| {
                scope.spawn(move || index.search_vector(embedding, fetch, filter))
            });
            let text_scored = index.search_text(query, fetch, filter)?;

            let vector_scored = match vector_handle {
                Some(handle) => handle
                    .join()
                    .map_err(|_| Error::Index {
                        operation: "search_vector".to_string(),
                        cause: "vector query thread panicked".to_string(),
                    })??,
                None => Vec::new(),
            };

            let vector_hits = self.scored_to_hits(index, vector_scored, true, filter)?;
            let text_hits = self.scored_to_hits(index, text_scored, false, filter)?;
            Ok((vector_hits, text_hits))
        })
    }

    fn vector_hits(
        &self,
        index: &Arc<MemoryIndex>,
        embedding: &[f32],
        fetch: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let scored = index.search_vector(embedding, fetch, filter)?;
        self.scored_to_hits(index, scored, true, filter)
    }

    fn text_hits(
        &self,
        index: &Arc<MemoryIndex>,
        query: &str,
        fetch: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let scored = index.search_text(query, fetch, filter)?;
        self.scored_to_hits(index, scored, false, filter)
    }

    /// Materializes scored ids into hits, preserving ranking order.
    ///
    /// Vector distances convert to similarity `1 / (1 + distance)`; the
    /// `min_similarity` cutoff applies to that similarity.
    fn scored_to_hits(
        &self,
        index: &MemoryIndex,
        scored: Vec<(MemoryId, f32)>,
        is_vector: bool,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let ids: Vec<MemoryId> = scored.iter().map(|(id, _)| id.clone()).collect();
        let mut by_id: HashMap<String, Memory> = index
            .get_batch(&ids)?
            .into_iter()
            .map(|m| (m.id.as_str().to_string(), m))
            .collect();

        let mut hits = Vec::with_capacity(scored.len());
        for (id, raw) in scored {
            let Some(memory) = by_id.remove(id.as_str()) else {
                continue;
            };
            if is_vector {
                let similarity = 1.0 / (1.0 + raw);
                if let Some(cutoff) = filter.min_similarity
                    && similarity < cutoff
                {
                    continue;
                }
                hits.push(SearchHit {
                    memory,
                    score: similarity,
                    vector_score: Some(similarity),
                    bm25_score: None,
                });
            } else {
                hits.push(SearchHit {
                    memory,
                    score: raw,
                    vector_score: None,
                    bm25_score: Some(raw),
                });
            }
        }
        Ok(hits)
    }

    /// Embeds the query, consulting the LRU cache first. `None` on
    /// embedding failure (the caller degrades per mode).
    fn query_embedding(&self, query: &str) -> Option<Vec<f32>> {
        {
            let mut cache = self
                .query_cache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(hit) = cache.get(query) {
                return Some(hit.clone());
            }
        }
        match self.embedder.embed(query) {
            Ok(embedding) => {
                let mut cache = self
                    .query_cache
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                cache.put(query.to_string(), embedding.clone());
                Some(embedding)
            },
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed; degrading to text");
                None
            },
        }
    }

    /// Hydrates a memory to the requested level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Hydration`] when the id is unknown or the backing
    /// note cannot be read.
    #[instrument(skip(self), fields(id = %id))]
    pub fn hydrate(
        &self,
        id: &MemoryId,
        level: DetailLevel,
        domain: Domain,
    ) -> Result<HydratedMemory> {
        let stack = self
            .stacks
            .iter()
            .find(|s| s.domain == domain)
            .ok_or_else(|| Error::Hydration {
                id: id.to_string(),
                cause: format!("domain {domain} not configured for this recall service"),
            })?;

        let mut memory = stack
            .index
            .get(id)?
            .ok_or_else(|| Error::Hydration {
                id: id.to_string(),
                cause: "not indexed; run `engram sync --mode repair`".to_string(),
            })?;

        if level == DetailLevel::Summary {
            memory.content = String::new();
            return Ok(HydratedMemory {
                memory,
                level,
                files: Vec::new(),
                truncated: false,
            });
        }

        // Full and Files read the body back from the source of truth.
        let text = stack
            .notes
            .show_note(memory.namespace, &memory.commit_id)?
            .ok_or_else(|| Error::Hydration {
                id: id.to_string(),
                cause: "backing note is gone".to_string(),
            })?;
        let records = NoteCodec::parse_many(&text)?;
        let slot = usize::try_from(memory.index).map_err(|_| Error::Hydration {
            id: id.to_string(),
            cause: "record index out of range".to_string(),
        })?;
        let record = records.get(slot).ok_or_else(|| Error::Hydration {
            id: id.to_string(),
            cause: format!("note has no record at index {}", memory.index),
        })?;
        memory.summary = record.summary.clone();
        memory.content = record.body.clone();
        memory.status = record.status;

        let (files, truncated) = if level == DetailLevel::Files {
            stack.notes.changed_files(
                &memory.commit_id,
                MAX_HYDRATED_FILES,
                MAX_HYDRATED_FILE_BYTES,
                MAX_HYDRATED_TOTAL_BYTES,
            )?
        } else {
            (Vec::new(), false)
        };

        Ok(HydratedMemory {
            memory,
            level,
            files,
            truncated,
        })
    }
}
