//! Forward-only schema migrations for the index database.
//!
//! `meta.schema_version` is monotonic. On startup every migration from the
//! current version to the target runs inside its own transaction; a failure
//! aborts startup with `SchemaMigrationFailed` and leaves the schema at the
//! last committed version.

use crate::{Error, Result};
use rusqlite::Connection;

/// A single migration with version and SQL.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Migration version (sequential, starting at 1).
    pub version: i64,
    /// Human-readable description.
    pub description: &'static str,
    /// SQL to apply; may contain multiple statements.
    pub sql: &'static str,
}

/// The index schema, in order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "memories table and lookup indexes",
        sql: "
            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                commit_id TEXT NOT NULL,
                note_index INTEGER NOT NULL,
                namespace TEXT NOT NULL,
                domain TEXT NOT NULL,
                summary TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                spec TEXT,
                phase TEXT,
                tags TEXT,
                status TEXT NOT NULL,
                relates_to TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memories_namespace ON memories(namespace);
            CREATE INDEX IF NOT EXISTS idx_memories_spec ON memories(spec);
            CREATE INDEX IF NOT EXISTS idx_memories_commit ON memories(commit_id);
            CREATE INDEX IF NOT EXISTS idx_memories_timestamp ON memories(timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_memories_status ON memories(status);
        ",
    },
    Migration {
        version: 2,
        description: "full-text index over summary and content",
        sql: "
            CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
                id UNINDEXED,
                summary,
                content,
                tokenize='porter unicode61'
            );
        ",
    },
    Migration {
        version: 3,
        description: "embedding vectors",
        sql: "
            CREATE TABLE IF NOT EXISTS memory_vectors (
                id TEXT PRIMARY KEY,
                embedding BLOB NOT NULL
            );
        ",
    },
];

/// Maximum version across a set of migrations.
#[must_use]
pub fn max_version(migrations: &[Migration]) -> i64 {
    migrations.iter().map(|m| m.version).max().unwrap_or(0)
}

/// Runs all pending migrations on the connection.
///
/// The `meta` table is created first (outside versioning) so the version can
/// be tracked at all.
///
/// # Errors
///
/// Returns [`Error::SchemaMigrationFailed`] when a step cannot be applied;
/// the transaction for that step is rolled back.
pub fn run_migrations(conn: &Connection, migrations: &[Migration]) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )
    .map_err(|e| Error::Index {
        operation: "create_meta_table".to_string(),
        cause: e.to_string(),
    })?;

    let current = current_version(conn)?;

    for migration in migrations {
        if migration.version <= current {
            continue;
        }
        apply_migration(conn, migration, current)?;
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "applied index migration"
        );
    }

    Ok(())
}

/// Reads the current schema version (0 before any migration).
///
/// # Errors
///
/// Returns [`Error::Index`] on query failure.
pub fn current_version(conn: &Connection) -> Result<i64> {
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| {
            if e == rusqlite::Error::QueryReturnedNoRows {
                Ok(None)
            } else {
                Err(e)
            }
        })
        .map_err(|e| Error::Index {
            operation: "read_schema_version".to_string(),
            cause: e.to_string(),
        })?;

    Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
}

fn apply_migration(conn: &Connection, migration: &Migration, from: i64) -> Result<()> {
    let fail = |cause: String| Error::SchemaMigrationFailed {
        from,
        to: migration.version,
        cause,
    };

    conn.execute("BEGIN IMMEDIATE", [])
        .map_err(|e| fail(e.to_string()))?;

    let result = (|| -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(migration.sql)?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = ?1",
            [migration.version.to_string()],
        )?;
        Ok(())
    })();

    match result {
        Ok(()) => conn
            .execute("COMMIT", [])
            .map(|_| ())
            .map_err(|e| fail(e.to_string())),
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(fail(e.to_string()))
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;

    #[test]
    fn test_migrations_are_sequential() {
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version, i64::try_from(i).unwrap() + 1);
        }
    }

    #[test]
    fn test_run_from_scratch() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn, MIGRATIONS).unwrap();
        assert_eq!(current_version(&conn).unwrap(), max_version(MIGRATIONS));

        // All tables exist.
        for table in ["memories", "memories_fts", "memory_vectors", "meta"] {
            let count: i64 = conn
                .query_row(
                    "SELECT count(*) FROM sqlite_master WHERE name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn, MIGRATIONS).unwrap();
        run_migrations(&conn, MIGRATIONS).unwrap();
        assert_eq!(current_version(&conn).unwrap(), max_version(MIGRATIONS));
    }

    #[test]
    fn test_failed_step_reports_versions() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn, MIGRATIONS).unwrap();

        let broken = [Migration {
            version: max_version(MIGRATIONS) + 1,
            description: "broken",
            sql: "CREATE TABLE invalid syntax here",
        }];
        let err = run_migrations(&conn, &broken).unwrap_err();
        match err {
            Error::SchemaMigrationFailed { from, to, .. } => {
                assert_eq!(from, max_version(MIGRATIONS));
                assert_eq!(to, max_version(MIGRATIONS) + 1);
            },
            other => panic!("expected SchemaMigrationFailed, got {other}"),
        }
        // Version unchanged after the rollback.
        assert_eq!(current_version(&conn).unwrap(), max_version(MIGRATIONS));
    }
}
