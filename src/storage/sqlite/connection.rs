//! Shared connection handling for the `SQLite` index.
//!
//! The index keeps one connection per database behind a mutex. Two concerns
//! live here: taking that mutex without letting a past panic wedge every
//! later operation, and the pragma profile each connection gets (WAL
//! journaling, NORMAL synchronous, a busy timeout long enough that writer
//! contention blocks instead of erroring).

use crate::{Error, Result};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};

/// Takes the connection mutex, recovering from poisoning.
///
/// A panic inside a critical section poisons the mutex but cannot corrupt
/// the connection: statements either committed or rolled back. Refusing the
/// guard would turn one crashed capture into a permanently dead index, so
/// the poison flag is logged, counted, and ignored.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("index mutex poisoned; reusing the connection guard");
        metrics::counter!("engram_index_mutex_poison_recovery_total").increment(1);
        poisoned.into_inner()
    })
}

/// Configures a `SQLite` connection for concurrent access.
///
/// - **WAL mode**: concurrent readers with a single writer
/// - **NORMAL synchronous**: balances durability with performance
/// - **`busy_timeout`**: waits out lock contention instead of failing with
///   `SQLITE_BUSY` (floor of 5000 ms per the concurrency contract)
///
/// # Errors
///
/// Returns [`Error::Index`] if the busy timeout cannot be applied.
pub fn configure_connection(conn: &Connection, busy_timeout_ms: u64) -> Result<()> {
    // journal_mode returns a string result which execute would reject;
    // pragma_update handles it.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");

    let timeout = busy_timeout_ms.max(5000);
    conn.pragma_update(None, "busy_timeout", timeout.to_string())
        .map_err(|e| Error::Index {
            operation: "configure_connection".to_string(),
            cause: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn scratch_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE captures (seq INTEGER PRIMARY KEY, worker INTEGER NOT NULL)",
            [],
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_acquire_lock_recovers_from_poisoned_connection() {
        let shared = Arc::new(Mutex::new(scratch_connection()));

        // Panic while holding the guard, as a crashed capture would.
        let holder = Arc::clone(&shared);
        let _ = thread::spawn(move || {
            let conn = holder.lock().unwrap();
            conn.execute("INSERT INTO captures (worker) VALUES (0)", [])
                .unwrap();
            panic!("capture died mid-operation");
        })
        .join();
        assert!(shared.is_poisoned());

        // The connection behind the poisoned mutex still serves queries.
        let conn = acquire_lock(&shared);
        let rows: i64 = conn
            .query_row("SELECT count(*) FROM captures", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_guarded_connection_serializes_writers() {
        let shared = Arc::new(Mutex::new(scratch_connection()));

        thread::scope(|scope| {
            for worker in 0..4i64 {
                let shared = Arc::clone(&shared);
                scope.spawn(move || {
                    for _ in 0..5 {
                        let conn = acquire_lock(&shared);
                        conn.execute(
                            "INSERT INTO captures (worker) VALUES (?1)",
                            [worker],
                        )
                        .unwrap();
                    }
                });
            }
        });

        // Every insert landed; the primary key saw no collisions.
        let conn = acquire_lock(&shared);
        let rows: i64 = conn
            .query_row("SELECT count(*) FROM captures", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 20);
        let workers: i64 = conn
            .query_row("SELECT count(DISTINCT worker) FROM captures", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(workers, 4);
    }

    #[test]
    fn test_configure_connection() {
        let conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn, 5000).unwrap();

        let synchronous: i32 = conn
            .pragma_query_value(None, "synchronous", |row| row.get(0))
            .unwrap();
        assert_eq!(synchronous, 1, "Expected NORMAL synchronous mode (1)");

        let busy_timeout: i32 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(busy_timeout, 5000);
    }

    #[test]
    fn test_busy_timeout_floor() {
        let conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn, 10).unwrap();

        let busy_timeout: i32 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(busy_timeout, 5000);
    }
}
