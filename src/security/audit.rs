//! Append-only audit log with size-based rotation.
//!
//! Every detection, filter application, scan run, and allowlist mutation is
//! recorded as one JSON line under `<data_dir>/audit/`. The active file is
//! `audit.log`; rotation shifts it to `audit.log.1` .. `audit.log.N` and
//! drops the oldest beyond the configured count.

use crate::models::Namespace;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Kind of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A detector matched sensitive content.
    Detection,
    /// The filter rewrote content (redact or mask).
    Filter,
    /// An explicit scan run completed.
    Scan,
    /// The allowlist was mutated.
    Allowlist,
}

impl AuditKind {
    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::Filter => "filter",
            Self::Scan => "scan",
            Self::Allowlist => "allowlist",
        }
    }

    /// Parses a kind from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "detection" => Some(Self::Detection),
            "filter" => Some(Self::Filter),
            "scan" => Some(Self::Scan),
            "allowlist" => Some(Self::Allowlist),
            _ => None,
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event id.
    pub id: String,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Event kind.
    pub kind: AuditKind,
    /// Namespace involved, when known.
    pub namespace: Option<String>,
    /// Originating operation ("capture", "scan", "allowlist", ...).
    pub source: String,
    /// Kind-specific payload (detector names, counts, hashes).
    pub detail: serde_json::Value,
}

impl AuditEvent {
    /// Creates an event stamped now.
    #[must_use]
    pub fn new(
        kind: AuditKind,
        namespace: Option<Namespace>,
        source: impl Into<String>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            namespace: namespace.map(|n| n.as_str().to_string()),
            source: source.into(),
            detail,
        }
    }
}

/// Aggregate counts over the audit log.
#[derive(Debug, Clone, Default)]
pub struct AuditStats {
    /// Total events across all files.
    pub total: u64,
    /// Counts keyed by event kind.
    pub by_kind: BTreeMap<String, u64>,
}

/// Rotating JSONL audit logger.
pub struct AuditLogger {
    dir: PathBuf,
    max_size_bytes: u64,
    max_files: usize,
    write_guard: Mutex<()>,
}

impl AuditLogger {
    /// Creates a logger writing under `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, max_size_bytes: u64, max_files: usize) -> Self {
        Self {
            dir: dir.into(),
            max_size_bytes,
            max_files: max_files.max(1),
            write_guard: Mutex::new(()),
        }
    }

    fn active_path(&self) -> PathBuf {
        self.dir.join("audit.log")
    }

    fn rotated_path(&self, n: usize) -> PathBuf {
        self.dir.join(format!("audit.log.{n}"))
    }

    /// Appends one event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] when the log cannot be written.
    pub fn log(&self, event: &AuditEvent) -> Result<()> {
        let _guard = self
            .write_guard
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::PermissionDenied(format!("{}: {e}", self.dir.display())))?;

        self.rotate_if_needed()?;

        let line = serde_json::to_string(event).map_err(|e| Error::Validation(e.to_string()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.active_path())
            .map_err(|e| Error::PermissionDenied(format!("audit.log: {e}")))?;
        writeln!(file, "{line}").map_err(|e| Error::PermissionDenied(format!("audit.log: {e}")))?;

        metrics::counter!("engram_audit_events_total", "kind" => event.kind.as_str())
            .increment(1);
        Ok(())
    }

    fn rotate_if_needed(&self) -> Result<()> {
        let active = self.active_path();
        let size = std::fs::metadata(&active).map(|m| m.len()).unwrap_or(0);
        if size < self.max_size_bytes {
            return Ok(());
        }

        // Shift audit.log.(N-1) .. audit.log.1 up by one, dropping the oldest.
        let _ = std::fs::remove_file(self.rotated_path(self.max_files));
        for n in (1..self.max_files).rev() {
            let from = self.rotated_path(n);
            if from.exists() {
                let _ = std::fs::rename(&from, self.rotated_path(n + 1));
            }
        }
        std::fs::rename(&active, self.rotated_path(1))
            .map_err(|e| Error::PermissionDenied(format!("rotate audit.log: {e}")))?;
        Ok(())
    }

    /// Queries events, newest first, across the active and rotated files.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] when a log file cannot be read.
    pub fn query(
        &self,
        since: Option<DateTime<Utc>>,
        namespace: Option<Namespace>,
        kind: Option<AuditKind>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>> {
        let mut events = Vec::new();

        // Oldest rotated file first so the final ordering is chronological.
        let mut paths: Vec<PathBuf> = (1..=self.max_files)
            .rev()
            .map(|n| self.rotated_path(n))
            .collect();
        paths.push(self.active_path());

        for path in paths {
            let Ok(raw) = std::fs::read_to_string(&path) else {
                continue;
            };
            for line in raw.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(event) = serde_json::from_str::<AuditEvent>(line) else {
                    tracing::warn!(path = %path.display(), "skipping malformed audit line");
                    continue;
                };
                if let Some(since) = since
                    && event.timestamp < since
                {
                    continue;
                }
                if let Some(ns) = namespace
                    && event.namespace.as_deref() != Some(ns.as_str())
                {
                    continue;
                }
                if let Some(kind) = kind
                    && event.kind != kind
                {
                    continue;
                }
                events.push(event);
            }
        }

        // Newest first, bounded.
        events.reverse();
        events.truncate(limit);
        Ok(events)
    }

    /// Returns aggregate counts over every retained event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] when a log file cannot be read.
    pub fn stats(&self) -> Result<AuditStats> {
        let events = self.query(None, None, None, usize::MAX)?;
        let mut stats = AuditStats::default();
        for event in events {
            stats.total += 1;
            *stats
                .by_kind
                .entry(event.kind.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use tempfile::TempDir;

    fn event(kind: AuditKind) -> AuditEvent {
        AuditEvent::new(
            kind,
            Some(Namespace::Decisions),
            "test",
            serde_json::json!({"n": 1}),
        )
    }

    #[test]
    fn test_log_and_query() {
        let dir = TempDir::new().unwrap();
        let logger = AuditLogger::new(dir.path(), 1024 * 1024, 3);

        logger.log(&event(AuditKind::Detection)).unwrap();
        logger.log(&event(AuditKind::Filter)).unwrap();
        logger.log(&event(AuditKind::Scan)).unwrap();

        let all = logger.query(None, None, None, 10).unwrap();
        assert_eq!(all.len(), 3);
        // Newest first.
        assert_eq!(all[0].kind, AuditKind::Scan);

        let detections = logger
            .query(None, None, Some(AuditKind::Detection), 10)
            .unwrap();
        assert_eq!(detections.len(), 1);
    }

    #[test]
    fn test_namespace_filter() {
        let dir = TempDir::new().unwrap();
        let logger = AuditLogger::new(dir.path(), 1024 * 1024, 3);

        logger.log(&event(AuditKind::Detection)).unwrap();
        let other = AuditEvent::new(
            AuditKind::Detection,
            Some(Namespace::Learnings),
            "test",
            serde_json::json!({}),
        );
        logger.log(&other).unwrap();

        let hits = logger
            .query(None, Some(Namespace::Learnings), None, 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].namespace.as_deref(), Some("learnings"));
    }

    #[test]
    fn test_rotation_keeps_bounded_files() {
        let dir = TempDir::new().unwrap();
        // Tiny threshold: every append rotates.
        let logger = AuditLogger::new(dir.path(), 1, 2);

        for _ in 0..6 {
            logger.log(&event(AuditKind::Detection)).unwrap();
        }

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"audit.log".to_string()));
        assert!(
            names.len() <= 3,
            "expected at most active + 2 rotated, got {names:?}"
        );
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let logger = AuditLogger::new(dir.path(), 1024 * 1024, 3);

        logger.log(&event(AuditKind::Detection)).unwrap();
        logger.log(&event(AuditKind::Detection)).unwrap();
        logger.log(&event(AuditKind::Allowlist)).unwrap();

        let stats = logger.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_kind.get("detection"), Some(&2));
        assert_eq!(stats.by_kind.get("allowlist"), Some(&1));
    }
}
