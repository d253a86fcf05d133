//! Pending implicit captures.
//!
//! Implicit capture proposals (from hooks or an LLM analyzer) wait here for
//! operator approval; nothing reaches the note store until approved. The
//! store is a single JSON file under the data directory.

use crate::models::{CaptureInput, Domain, MemoryStatus, Namespace};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

/// One proposed capture awaiting review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCapture {
    /// Store-assigned id.
    pub id: String,
    /// When the proposal was recorded.
    pub created_at: DateTime<Utc>,
    /// Where the proposal came from ("hook", "analyzer", ...).
    pub source: String,
    /// Proposed namespace.
    pub namespace: Namespace,
    /// Proposed summary.
    pub summary: String,
    /// Proposed content.
    pub content: String,
    /// Proposed spec identifier.
    pub spec: Option<String>,
    /// Proposed tags.
    pub tags: Vec<String>,
    /// Target domain.
    pub domain: Domain,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PendingFile {
    entries: Vec<PendingCapture>,
}

/// File-backed store of pending implicit captures.
pub struct ImplicitCaptureStore {
    path: PathBuf,
    entries: Mutex<Vec<PendingCapture>>,
}

impl ImplicitCaptureStore {
    /// Loads the store, starting empty when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] on a corrupt store file.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let file: PendingFile = serde_json::from_str(&raw)
                    .map_err(|e| Error::Validation(format!("pending store {}: {e}", path.display())))?;
                file.entries
            },
            Err(_) => Vec::new(),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Records a proposal, assigning and returning its id.
    ///
    /// # Errors
    ///
    /// Returns persistence failures.
    pub fn put(&self, mut pending: PendingCapture) -> Result<String> {
        pending.id = uuid::Uuid::new_v4().to_string();
        let id = pending.id.clone();
        {
            let mut entries = self.lock();
            entries.push(pending);
        }
        self.persist()?;
        Ok(id)
    }

    /// Approves a proposal, removing it and returning the capture input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an unknown id.
    pub fn approve(&self, id: &str) -> Result<CaptureInput> {
        let pending = {
            let mut entries = self.lock();
            let position = entries
                .iter()
                .position(|e| e.id == id)
                .ok_or_else(|| Error::Validation(format!("no pending capture '{id}'")))?;
            entries.remove(position)
        };
        self.persist()?;
        Ok(CaptureInput {
            namespace: pending.namespace,
            summary: pending.summary,
            content: pending.content,
            spec: pending.spec,
            tags: pending.tags,
            phase: None,
            status: Some(MemoryStatus::Active),
            relates_to: Vec::new(),
            commit: None,
            domain: pending.domain,
            skip_lock: false,
        })
    }

    /// Rejects (drops) a proposal. Returns false for an unknown id.
    ///
    /// # Errors
    ///
    /// Returns persistence failures.
    pub fn reject(&self, id: &str) -> Result<bool> {
        let removed = {
            let mut entries = self.lock();
            let before = entries.len();
            entries.retain(|e| e.id != id);
            entries.len() != before
        };
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Drops proposals older than the cutoff. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns persistence failures.
    pub fn cleanup(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let removed = {
            let mut entries = self.lock();
            let before = entries.len();
            entries.retain(|e| e.created_at >= older_than);
            before - entries.len()
        };
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Snapshot of current proposals.
    #[must_use]
    pub fn list(&self) -> Vec<PendingCapture> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PendingCapture>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn persist(&self) -> Result<()> {
        let file = PendingFile {
            entries: self.lock().clone(),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::PermissionDenied(format!("{}: {e}", parent.display())))?;
        }
        let json =
            serde_json::to_string_pretty(&file).map_err(|e| Error::Validation(e.to_string()))?;
        std::fs::write(&self.path, json)
            .map_err(|e| Error::PermissionDenied(format!("{}: {e}", self.path.display())))
    }
}
