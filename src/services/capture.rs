//! Memory capture service.
//!
//! The capture pipeline runs end to end under the advisory file lock:
//! validate, filter secrets, resolve the commit, determine the record index
//! within the `(namespace, commit)` note, serialize, append, then embed and
//! index. The note append is the durability point: embedding and index
//! failures degrade to a warning and the sync service repairs the index
//! later.

use super::lock::CaptureLock;
use crate::config::LimitsConfig;
use crate::embedding::EmbeddingProvider;
use crate::git::{GitNotes, NoteCodec, NoteRecord};
use crate::models::{
    CaptureInput, CaptureResult, Domain, Memory, MemoryId, MemoryStatus,
};
use crate::security::{FilterAction, SecretsFilter};
use crate::storage::MemoryIndex;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::instrument;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]{0,63}$").unwrap()
});

/// Service for capturing memories into one domain.
pub struct CaptureService {
    domain: Domain,
    notes: GitNotes,
    index: Arc<MemoryIndex>,
    embedder: Arc<EmbeddingProvider>,
    secrets: Arc<SecretsFilter>,
    lock: CaptureLock,
    limits: LimitsConfig,
}

impl CaptureService {
    /// Assembles a capture service from its collaborators.
    #[must_use]
    pub const fn new(
        domain: Domain,
        notes: GitNotes,
        index: Arc<MemoryIndex>,
        embedder: Arc<EmbeddingProvider>,
        secrets: Arc<SecretsFilter>,
        lock: CaptureLock,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            domain,
            notes,
            index,
            embedder,
            secrets,
            lock,
            limits,
        }
    }

    /// Captures a memory.
    ///
    /// Success means the note was durably appended; `indexed` and `warning`
    /// on the result report any soft failure after that point.
    ///
    /// # Errors
    ///
    /// Hard failures: [`Error::Validation`], [`Error::ContentBlocked`],
    /// [`Error::NoCommits`], [`Error::LockTimeout`], [`Error::Git`].
    #[instrument(skip(self, input), fields(namespace = input.namespace.as_str(), domain = self.domain.as_str()))]
    pub fn capture(&self, input: CaptureInput) -> Result<CaptureResult> {
        let _guard = if input.skip_lock {
            None
        } else {
            Some(self.lock.acquire()?)
        };
        self.capture_locked(input)
    }

    fn capture_locked(&self, mut input: CaptureInput) -> Result<CaptureResult> {
        // One notion of "the summary": the trimmed text is what gets
        // validated, filtered, and stored.
        input.summary = input.summary.trim().to_string();
        self.validate(&input)?;
        let namespace = input.namespace;

        let summary_outcome = self
            .secrets
            .filter(&input.summary, "capture", Some(namespace));
        if summary_outcome.action == FilterAction::Blocked {
            return Err(blocked_error(&summary_outcome));
        }
        let content_outcome = self
            .secrets
            .filter(&input.content, "capture", Some(namespace));
        if content_outcome.action == FilterAction::Blocked {
            return Err(blocked_error(&content_outcome));
        }

        let commitish = input.commit.as_deref().unwrap_or("HEAD");
        let commit_id = self.notes.resolve_commit(commitish)?;

        let next_index = match self.notes.show_note(namespace, &commit_id)? {
            Some(text) => u32::try_from(NoteCodec::parse_many(&text)?.len())
                .map_err(|_| Error::Validation("note record count overflow".to_string()))?,
            None => 0,
        };

        // Whole-second timestamps so serialization round-trips exactly.
        let timestamp = truncate_to_seconds(Utc::now());
        let record = NoteRecord {
            namespace,
            timestamp,
            summary: summary_outcome.content,
            spec: input.spec,
            phase: input.phase,
            tags: input.tags,
            status: input.status.unwrap_or_default(),
            relates_to: input
                .relates_to
                .iter()
                .map(|id| id.as_str().to_string())
                .collect(),
            body: content_outcome.content,
        };

        let serialized = NoteCodec::serialize(&record);
        self.notes.append_note(namespace, &commit_id, &serialized)?;

        // The note is durable from here on; everything below is soft.
        let memory = record.to_memory(&commit_id, next_index, self.domain);
        let (indexed, warning) = self.index_memory(&memory);

        metrics::counter!(
            "engram_captures_total",
            "namespace" => namespace.as_str(),
            "indexed" => if indexed { "true" } else { "false" }
        )
        .increment(1);
        tracing::info!(id = %memory.id, indexed, "captured memory");

        Ok(CaptureResult {
            success: true,
            memory,
            indexed,
            warning,
        })
    }

    /// Transitions a memory's status along the lifecycle DAG.
    ///
    /// Rewrites the backing note (replacing all records of the
    /// `(namespace, commit)` pair) and re-indexes; the id stays addressable.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTransition`] for an edge outside the DAG
    /// - [`Error::Validation`] when the id is malformed or has no backing note
    #[instrument(skip(self))]
    pub fn transition(&self, id: &MemoryId, target: MemoryStatus) -> Result<Memory> {
        let _guard = self.lock.acquire()?;

        let (namespace, commit_prefix, record_index) = id
            .parts()
            .ok_or_else(|| Error::Validation(format!("malformed memory id: {id}")))?;
        let commit_id = self.notes.resolve_commit(commit_prefix)?;

        let text = self
            .notes
            .show_note(namespace, &commit_id)?
            .ok_or_else(|| Error::Validation(format!("no note backs memory {id}")))?;
        let mut records = NoteCodec::parse_many(&text)?;
        let slot = usize::try_from(record_index)
            .map_err(|_| Error::Validation(format!("record index out of range for {id}")))?;
        let record = records
            .get_mut(slot)
            .ok_or_else(|| Error::Validation(format!("no record at index {record_index} for {id}")))?;

        if !record.status.can_transition_to(target) {
            return Err(Error::InvalidTransition {
                from: record.status.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        record.status = target;

        let rewritten = NoteCodec::serialize_many(&records);
        self.notes.overwrite_note(namespace, &commit_id, &rewritten)?;

        let memory = records[slot].to_memory(&commit_id, record_index, self.domain);
        let (_, warning) = self.index_memory_update(&memory);
        if let Some(warning) = warning {
            tracing::warn!(id = %id, warning, "transition indexed with warning");
        }
        tracing::info!(id = %id, status = target.as_str(), "transitioned memory");
        Ok(memory)
    }

    /// Embeds and inserts; both steps are soft failures.
    fn index_memory(&self, memory: &Memory) -> (bool, Option<String>) {
        let (embedding, mut warning) = self.embed_soft(memory);
        match self.index.insert(memory, embedding.as_deref()) {
            Ok(()) => (true, warning),
            Err(e) => {
                let message = format!("index update failed: {e}; run `engram sync --mode repair`");
                tracing::warn!(id = %memory.id, error = %e, "capture left unindexed");
                warning = Some(warning.map_or_else(|| message.clone(), |w| format!("{w}; {message}")));
                (false, warning)
            },
        }
    }

    fn index_memory_update(&self, memory: &Memory) -> (bool, Option<String>) {
        let (embedding, mut warning) = self.embed_soft(memory);
        match self.index.upsert(memory, embedding.as_deref()) {
            Ok(_) => (true, warning),
            Err(e) => {
                let message = format!("index update failed: {e}");
                warning = Some(warning.map_or_else(|| message.clone(), |w| format!("{w}; {message}")));
                (false, warning)
            },
        }
    }

    fn embed_soft(&self, memory: &Memory) -> (Option<Vec<f32>>, Option<String>) {
        match self
            .embedder
            .embed(&embedding_text(&memory.summary, &memory.content))
        {
            Ok(vector) => (Some(vector), None),
            Err(e) => {
                tracing::warn!(id = %memory.id, error = %e, "capture without embedding");
                (None, Some(format!("embedding failed: {e}; text search still works")))
            },
        }
    }

    /// Expects `input.summary` already trimmed by the caller.
    fn validate(&self, input: &CaptureInput) -> Result<()> {
        if input.summary.is_empty() {
            return Err(Error::Validation("summary must not be empty".to_string()));
        }
        let summary_chars = input.summary.chars().count();
        if summary_chars > self.limits.max_summary_chars {
            return Err(Error::Validation(format!(
                "summary is {summary_chars} characters, max {}",
                self.limits.max_summary_chars
            )));
        }
        if input.summary.chars().any(char::is_control) {
            return Err(Error::Validation(
                "summary must be a single line without control characters".to_string(),
            ));
        }

        if input.content.is_empty() {
            return Err(Error::Validation("content must not be empty".to_string()));
        }
        let content_bytes = input.content.len();
        if content_bytes > self.limits.max_content_bytes {
            return Err(Error::Validation(format!(
                "content is {content_bytes} bytes, max {}",
                self.limits.max_content_bytes
            )));
        }

        for tag in &input.tags {
            if !TOKEN_RE.is_match(tag) {
                return Err(Error::Validation(format!("invalid tag: '{tag}'")));
            }
        }
        for token in input.spec.iter().chain(input.phase.iter()) {
            if !TOKEN_RE.is_match(token) {
                return Err(Error::Validation(format!("invalid token: '{token}'")));
            }
        }
        for related in &input.relates_to {
            if related.parts().is_none() {
                return Err(Error::Validation(format!(
                    "relates_to entry is not a memory id: '{related}'"
                )));
            }
        }
        Ok(())
    }
}

/// Text fed to the embedding provider for a memory.
pub(crate) fn embedding_text(summary: &str, content: &str) -> String {
    format!("{summary}\n\n{content}")
}

/// Truncates an instant to whole seconds.
pub(crate) fn truncate_to_seconds(when: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(when.timestamp(), 0).unwrap_or(when)
}

fn blocked_error(outcome: &crate::security::FilterOutcome) -> Error {
    let kinds: Vec<&str> = outcome
        .detections
        .iter()
        .map(|d| d.kind.as_str())
        .collect();
    Error::ContentBlocked {
        reason: format!("secrets detected: {}", kinds.join(", ")),
    }
}
