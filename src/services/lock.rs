//! Advisory capture lock.
//!
//! A process-global `flock`-style lock on `<data_dir>/.capture.lock` guards
//! the capture pipeline end to end. Acquisition blocks with a retry schedule
//! (0.1 s base, capped at 1 s) up to the configured budget. The holder's PID
//! is written into the file purely for diagnostics; a crashed holder's lock
//! is released by the OS, and the file is never removed or judged stale by
//! modification time.

use crate::{Error, Result};
use fs2::FileExt;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

const RETRY_BASE: Duration = Duration::from_millis(100);
const RETRY_CAP: Duration = Duration::from_secs(1);

/// Factory for acquisitions of the capture lock.
#[derive(Debug, Clone)]
pub struct CaptureLock {
    path: PathBuf,
    timeout: Duration,
}

impl CaptureLock {
    /// Creates a lock handle for the given path and wait budget.
    #[must_use]
    pub const fn new(path: PathBuf, timeout: Duration) -> Self {
        Self { path, timeout }
    }

    /// Acquires the lock, blocking up to the timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::LockTimeout`] when the budget elapses
    /// - [`Error::PermissionDenied`] when the lock file cannot be opened
    pub fn acquire(&self) -> Result<CaptureLockGuard> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::PermissionDenied(format!("{}: {e}", parent.display())))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| Error::PermissionDenied(format!("{}: {e}", self.path.display())))?;

        let start = Instant::now();
        let mut backoff = RETRY_BASE;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(_) => {
                    let waited = start.elapsed();
                    if waited >= self.timeout {
                        metrics::counter!("engram_capture_lock_timeouts_total").increment(1);
                        return Err(Error::LockTimeout {
                            waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                        });
                    }
                    let remaining = self.timeout - waited;
                    std::thread::sleep(backoff.min(remaining));
                    backoff = (backoff * 2).min(RETRY_CAP);
                },
            }
        }

        // PID inside the file is diagnostic only; never used for staleness.
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());

        tracing::debug!(path = %self.path.display(), "capture lock acquired");
        Ok(CaptureLockGuard { file })
    }
}

/// Holds the lock; released on drop via OS-level unlock.
pub struct CaptureLockGuard {
    file: File,
}

impl Drop for CaptureLockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            tracing::warn!(error = %e, "capture lock unlock failed (released on close)");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let lock = CaptureLock::new(dir.path().join(".capture.lock"), Duration::from_secs(1));

        let guard = lock.acquire().unwrap();
        drop(guard);
        // Released: a second acquisition succeeds immediately.
        let _guard = lock.acquire().unwrap();
    }

    #[test]
    fn test_pid_is_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".capture.lock");
        let lock = CaptureLock::new(path.clone(), Duration::from_secs(1));

        let _guard = lock.acquire().unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_lock_file_survives_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".capture.lock");
        let lock = CaptureLock::new(path.clone(), Duration::from_secs(1));
        drop(lock.acquire().unwrap());
        // The file is never deleted; only the OS lock is released.
        assert!(path.exists());
    }

    #[test]
    fn test_contention_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".capture.lock");

        // A second file handle in the same process contends through flock.
        let holder = CaptureLock::new(path.clone(), Duration::from_secs(1));
        let _held = holder.acquire().unwrap();

        let waiter = CaptureLock::new(path, Duration::from_millis(300));
        let started = Instant::now();
        let result = waiter.acquire();
        assert!(matches!(result, Err(Error::LockTimeout { .. })));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }
}
