//! Index synchronization and repair.
//!
//! The notes are the source of truth; the index is a derived copy. This
//! service rebuilds the index from notes (incrementally or from scratch),
//! verifies the two against each other with content hashes, and repairs any
//! drift. Repair is idempotent: successive runs converge.

use super::capture::embedding_text;
use crate::embedding::EmbeddingProvider;
use crate::git::{GitNotes, NoteCodec};
use crate::models::{Domain, MemoryId, Namespace, VerificationResult};
use crate::storage::MemoryIndex;
use crate::{Result, current_timestamp};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::instrument;

/// Page size for index id iteration during verification.
const VERIFY_PAGE: usize = 500;

/// Outcome of a reindex run. Per-item errors are aggregated, not fatal.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Records upserted into the index.
    pub processed: usize,
    /// Per-item failures, in encounter order.
    pub errors: Vec<String>,
}

/// Service reconciling one domain's index with its notes.
pub struct SyncService {
    domain: Domain,
    notes: GitNotes,
    index: Arc<MemoryIndex>,
    embedder: Arc<EmbeddingProvider>,
}

impl SyncService {
    /// Assembles a sync service from its collaborators.
    #[must_use]
    pub const fn new(
        domain: Domain,
        notes: GitNotes,
        index: Arc<MemoryIndex>,
        embedder: Arc<EmbeddingProvider>,
    ) -> Self {
        Self {
            domain,
            notes,
            index,
            embedder,
        }
    }

    /// Reindexes every note. `full` truncates the index first (and runs
    /// storage optimization afterwards).
    ///
    /// `last_sync` advances even when nothing changed.
    ///
    /// # Errors
    ///
    /// Returns hard failures of the index itself; per-note problems land in
    /// the report instead.
    #[instrument(skip(self), fields(domain = self.domain.as_str(), full))]
    pub fn reindex(&self, full: bool) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        if full {
            self.index.clear_all()?;
        }

        for namespace in self.notes.list_namespaces_used()? {
            let listed = match self.notes.list_notes(namespace) {
                Ok(listed) => listed,
                Err(e) => {
                    report.errors.push(format!("list {namespace}: {e}"));
                    continue;
                },
            };
            for (_note_id, commit_id) in listed {
                match self.sync_note_to_index(&commit_id, namespace) {
                    Ok(count) => report.processed += count,
                    Err(e) => report
                        .errors
                        .push(format!("{namespace}@{commit_id}: {e}")),
                }
            }
        }

        if full {
            if let Err(e) = self.index.vacuum() {
                report.errors.push(format!("vacuum: {e}"));
            }
        }

        self.mark_synced()?;
        tracing::info!(
            processed = report.processed,
            errors = report.errors.len(),
            "reindex complete"
        );
        Ok(report)
    }

    /// Syncs the records of a single `(namespace, commit)` note.
    ///
    /// Used directly after a capture; a no-op when the index already holds
    /// the records. Embedding failures fall back to the zero vector so text
    /// search still finds the memory.
    ///
    /// # Errors
    ///
    /// Returns note read/parse failures and index transaction failures.
    pub fn sync_note_to_index(&self, commit: &str, namespace: Namespace) -> Result<usize> {
        let commit_id = self.notes.resolve_commit(commit)?;
        let Some(text) = self.notes.show_note(namespace, &commit_id)? else {
            return Ok(0);
        };
        let records = NoteCodec::parse_many(&text)?;

        let mut count = 0;
        for (i, record) in records.iter().enumerate() {
            let index = u32::try_from(i).unwrap_or(u32::MAX);
            let memory = record.to_memory(&commit_id, index, self.domain);
            let embedding = self
                .embedder
                .embed(&embedding_text(&memory.summary, &memory.content))
                .unwrap_or_else(|e| {
                    tracing::warn!(id = %memory.id, error = %e, "indexing with zero vector");
                    self.embedder.zero_vector()
                });
            self.index.upsert(&memory, Some(&embedding))?;
            count += 1;
        }
        Ok(count)
    }

    /// Compares the index against the notes.
    ///
    /// Expected ids come from parsing every note; `summary|body` hashes
    /// catch silent content divergence. Unparseable notes are logged and
    /// skipped: their records cannot be expected, so stale index rows for
    /// them surface as orphans.
    ///
    /// # Errors
    ///
    /// Returns index query failures.
    #[instrument(skip(self), fields(domain = self.domain.as_str()))]
    pub fn verify_consistency(&self) -> Result<VerificationResult> {
        let expected = self.expected_from_notes()?;
        let mut result = VerificationResult::default();
        let mut seen: HashSet<MemoryId> = HashSet::with_capacity(expected.len());

        let mut pager = self.index.iter_all_ids(VERIFY_PAGE);
        loop {
            let page = pager.next_page()?;
            if page.is_empty() {
                break;
            }
            let memories = self.index.get_batch(&page)?;
            for memory in memories {
                match expected.get(&memory.id) {
                    None => result.orphaned_in_index.push(memory.id.clone()),
                    Some(expected_hash) => {
                        seen.insert(memory.id.clone());
                        let indexed_hash = content_hash(&memory.summary, &memory.content);
                        if &indexed_hash != expected_hash {
                            result.content_mismatched.push(memory.id.clone());
                        }
                    },
                }
            }
        }

        for id in expected.keys() {
            if !seen.contains(id) {
                result.missing_in_index.push(id.clone());
            }
        }
        result.missing_in_index.sort();
        result.orphaned_in_index.sort();
        result.content_mismatched.sort();

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("engram_index_drift", "domain" => self.domain.as_str())
            .set(result.drift_count() as f64);
        Ok(result)
    }

    /// Repairs drift: deletes orphans, re-syncs missing and mismatched ids
    /// from their notes.
    ///
    /// Pass a prior [`VerificationResult`] to skip re-verifying. Returns the
    /// number of repair operations performed.
    ///
    /// # Errors
    ///
    /// Returns index failures; per-note problems are logged and skipped so
    /// a rerun can converge.
    #[instrument(skip(self, verification), fields(domain = self.domain.as_str()))]
    pub fn repair(&self, verification: Option<VerificationResult>) -> Result<usize> {
        let verification = match verification {
            Some(v) => v,
            None => self.verify_consistency()?,
        };

        let mut operations = 0;
        for id in &verification.orphaned_in_index {
            if self.index.delete(id)? {
                operations += 1;
            }
        }

        // One sync per affected note covers every record in it.
        let mut affected: HashSet<(Namespace, String)> = HashSet::new();
        for id in verification
            .missing_in_index
            .iter()
            .chain(&verification.content_mismatched)
        {
            let Some((namespace, prefix, _)) = id.parts() else {
                tracing::warn!(id = %id, "cannot repair malformed id");
                continue;
            };
            affected.insert((namespace, prefix.to_string()));
        }
        for (namespace, prefix) in affected {
            match self.sync_note_to_index(&prefix, namespace) {
                Ok(count) => operations += count,
                Err(e) => {
                    tracing::warn!(namespace = namespace.as_str(), prefix, error = %e, "repair skipped note");
                },
            }
        }

        self.mark_synced()?;
        tracing::info!(operations, "repair complete");
        Ok(operations)
    }

    fn expected_from_notes(&self) -> Result<HashMap<MemoryId, String>> {
        let mut expected = HashMap::new();
        for namespace in self.notes.list_namespaces_used()? {
            for (_note_id, commit_id) in self.notes.list_notes(namespace)? {
                let Some(text) = self.notes.show_note(namespace, &commit_id)? else {
                    continue;
                };
                let records = match NoteCodec::parse_many(&text) {
                    Ok(records) => records,
                    Err(e) => {
                        tracing::warn!(
                            namespace = namespace.as_str(),
                            commit = %commit_id,
                            error = %e,
                            "skipping unparseable note"
                        );
                        continue;
                    },
                };
                for (i, record) in records.iter().enumerate() {
                    let index = u32::try_from(i).unwrap_or(u32::MAX);
                    expected.insert(
                        MemoryId::compose(namespace, &commit_id, index),
                        content_hash(&record.summary, &record.body),
                    );
                }
            }
        }
        Ok(expected)
    }

    fn mark_synced(&self) -> Result<()> {
        #[allow(clippy::cast_possible_wrap)]
        let now = DateTime::<Utc>::from_timestamp(current_timestamp() as i64, 0)
            .unwrap_or_else(Utc::now);
        self.index.set_last_sync(now)
    }
}

/// Hash used to detect content divergence between a note record and its
/// index row.
#[must_use]
pub fn content_hash(summary: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(summary.as_bytes());
    hasher.update(b"|");
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}
