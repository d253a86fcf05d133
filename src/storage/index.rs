//! The derived memory index.
//!
//! One `SQLite` database per domain holding three projections of the note
//! store: structured rows (`memories`), an FTS5 full-text index
//! (`memories_fts`), and embedding vectors (`memory_vectors`). The notes are
//! the source of truth; everything here is rebuildable, and the sync service
//! repairs any drift.
//!
//! # Concurrency
//!
//! A `Mutex<Connection>` serializes access within the process; WAL mode and
//! a generous `busy_timeout` handle contention across processes. Every write
//! runs in an immediate transaction: a failed operation leaves the index
//! unchanged.

use super::migrations::{MIGRATIONS, run_migrations};
use super::sqlite::{
    MEMORY_COLUMNS, MemoryRow, acquire_lock, build_filter_clause, build_memory_from_row,
    configure_connection, decode_embedding, encode_embedding, join_csv, sanitize_fts_query,
};
use crate::models::{IndexStats, Memory, MemoryId, SearchFilter};
use crate::{Error, Result, current_timestamp};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

/// Batch size for `get_existing_ids` IN clauses.
const ID_BATCH: usize = 500;

/// `SQLite`-backed memory index for one domain.
pub struct MemoryIndex {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl MemoryIndex {
    /// Opens (creating if needed) the index at `path` and runs migrations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] when the database cannot be opened and
    /// [`Error::SchemaMigrationFailed`] when a migration step fails; the
    /// caller must treat the latter as fatal.
    pub fn open(path: impl Into<PathBuf>, busy_timeout_ms: u64) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::PermissionDenied(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(&path).map_err(|e| Error::Index {
            operation: "open".to_string(),
            cause: e.to_string(),
        })?;
        configure_connection(&conn, busy_timeout_ms)?;
        run_migrations(&conn, MIGRATIONS)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: Some(path),
        })
    }

    /// Creates an in-memory index (tests).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] when initialization fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Index {
            operation: "open_in_memory".to_string(),
            cause: e.to_string(),
        })?;
        configure_connection(&conn, 5000)?;
        run_migrations(&conn, MIGRATIONS)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    /// Returns the database path (`None` for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Inserts a memory. Idempotent: an existing id is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] when the transaction fails; nothing is
    /// partially written.
    pub fn insert(&self, memory: &Memory, embedding: Option<&[f32]>) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        if row_exists(&conn, &memory.id)? {
            return Ok(());
        }
        with_transaction(&conn, "insert", |conn| {
            insert_rows(conn, memory, embedding)
        })?;
        metrics::counter!("engram_index_inserts_total").increment(1);
        Ok(())
    }

    /// Rewrites a memory in place (row, text, and vector projections).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] when the transaction fails.
    pub fn update(&self, memory: &Memory, embedding: Option<&[f32]>) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        with_transaction(&conn, "update", |conn| {
            delete_rows(conn, &memory.id)?;
            insert_rows(conn, memory, embedding)
        })
    }

    /// Inserts or updates. Returns true when the id was new.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] when the transaction fails.
    pub fn upsert(&self, memory: &Memory, embedding: Option<&[f32]>) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        let existed = row_exists(&conn, &memory.id)?;
        with_transaction(&conn, "upsert", |conn| {
            if existed {
                delete_rows(conn, &memory.id)?;
            }
            insert_rows(conn, memory, embedding)
        })?;
        Ok(!existed)
    }

    /// Deletes a memory from every projection. Returns true when it existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] when the transaction fails.
    pub fn delete(&self, id: &MemoryId) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        let existed = row_exists(&conn, id)?;
        if !existed {
            return Ok(false);
        }
        with_transaction(&conn, "delete", |conn| delete_rows(conn, id))?;
        Ok(true)
    }

    /// Returns true when the id is indexed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] on query failure.
    pub fn exists(&self, id: &MemoryId) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        row_exists(&conn, id)
    }

    /// Returns the subset of `candidates` that are indexed, batched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] on query failure.
    pub fn get_existing_ids(&self, candidates: &[MemoryId]) -> Result<HashSet<MemoryId>> {
        let conn = acquire_lock(&self.conn);
        let mut found = HashSet::new();
        for chunk in candidates.chunks(ID_BATCH) {
            let placeholders: Vec<String> =
                (1..=chunk.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "SELECT id FROM memories WHERE id IN ({})",
                placeholders.join(",")
            );
            let mut stmt = conn.prepare(&sql).map_err(index_err("get_existing_ids"))?;
            let rows = stmt
                .query_map(
                    params_from_iter(chunk.iter().map(MemoryId::as_str)),
                    |row| row.get::<_, String>(0),
                )
                .map_err(index_err("get_existing_ids"))?;
            for row in rows {
                found.insert(MemoryId::new(row.map_err(index_err("get_existing_ids"))?));
            }
        }
        Ok(found)
    }

    /// Fetches one memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] on query failure or row corruption.
    pub fn get(&self, id: &MemoryId) -> Result<Option<Memory>> {
        let conn = acquire_lock(&self.conn);
        let sql = format!("SELECT {MEMORY_COLUMNS} FROM memories m WHERE m.id = ?1");
        let row = conn
            .query_row(&sql, params![id.as_str()], MemoryRow::from_row)
            .optional()
            .map_err(index_err("get"))?;
        row.map(build_memory_from_row).transpose()
    }

    /// Fetches a batch of memories; ids that are not indexed are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] on query failure or row corruption.
    pub fn get_batch(&self, ids: &[MemoryId]) -> Result<Vec<Memory>> {
        let mut out = Vec::with_capacity(ids.len());
        let conn = acquire_lock(&self.conn);
        for chunk in ids.chunks(ID_BATCH) {
            let placeholders: Vec<String> =
                (1..=chunk.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "SELECT {MEMORY_COLUMNS} FROM memories m WHERE m.id IN ({})",
                placeholders.join(",")
            );
            let mut stmt = conn.prepare(&sql).map_err(index_err("get_batch"))?;
            let rows = stmt
                .query_map(
                    params_from_iter(chunk.iter().map(MemoryId::as_str)),
                    MemoryRow::from_row,
                )
                .map_err(index_err("get_batch"))?;
            for row in rows {
                out.push(build_memory_from_row(row.map_err(index_err("get_batch"))?)?);
            }
        }
        Ok(out)
    }

    /// KNN over stored vectors with metadata pre-filtering.
    ///
    /// Distance is cosine distance over L2-normalized vectors (`1 - dot`).
    /// Ties break by timestamp descending, then id ascending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] on query failure.
    pub fn search_vector(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(MemoryId, f32)>> {
        let (clause, filter_params, _) = build_filter_clause(filter, 1);
        let sql = format!(
            "SELECT v.id, v.embedding, m.timestamp FROM memory_vectors v
             JOIN memories m ON m.id = v.id
             WHERE 1=1{clause}"
        );

        let conn = acquire_lock(&self.conn);
        let mut stmt = conn.prepare(&sql).map_err(index_err("search_vector"))?;
        let rows = stmt
            .query_map(params_from_iter(filter_params.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(index_err("search_vector"))?;

        let mut scored: Vec<(MemoryId, f32, i64)> = Vec::new();
        for row in rows {
            let (id, blob, timestamp) = row.map_err(index_err("search_vector"))?;
            let vector = decode_embedding(&blob);
            if vector.len() != query.len() {
                continue;
            }
            let dot: f32 = query.iter().zip(&vector).map(|(a, b)| a * b).sum();
            let distance = 1.0 - dot;
            scored.push((MemoryId::new(id), distance, timestamp));
        }

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.2.cmp(&a.2))
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored.into_iter().map(|(id, d, _)| (id, d)).collect())
    }

    /// BM25 full-text search with metadata pre-filtering.
    ///
    /// Returns `(id, relevance)` with higher relevance first (negated BM25
    /// rank).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] on query failure.
    pub fn search_text(
        &self,
        query: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(MemoryId, f32)>> {
        let match_expr = sanitize_fts_query(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let (clause, filter_params, next_param) = build_filter_clause(filter, 2);
        let sql = format!(
            "SELECT m.id, bm25(memories_fts) FROM memories_fts
             JOIN memories m ON m.id = memories_fts.id
             WHERE memories_fts MATCH ?1{clause}
             ORDER BY bm25(memories_fts) ASC
             LIMIT ?{next_param}"
        );

        let mut all_params: Vec<rusqlite::types::Value> = vec![match_expr.into()];
        for param in filter_params {
            all_params.push(param.into());
        }
        all_params.push(i64::try_from(limit).unwrap_or(i64::MAX).into());

        let conn = acquire_lock(&self.conn);
        let mut stmt = conn.prepare(&sql).map_err(index_err("search_text"))?;
        let rows = stmt
            .query_map(params_from_iter(all_params.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })
            .map_err(index_err("search_text"))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, rank) = row.map_err(index_err("search_text"))?;
            #[allow(clippy::cast_possible_truncation)]
            out.push((MemoryId::new(id), -(rank as f32)));
        }
        Ok(out)
    }

    /// Returns a pager over all indexed ids in ascending order.
    #[must_use]
    pub const fn iter_all_ids(&self, page_size: usize) -> IdPager<'_> {
        IdPager {
            index: self,
            last: None,
            page_size,
            done: false,
        }
    }

    /// Computes aggregate statistics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] on query failure.
    pub fn stats(&self) -> Result<IndexStats> {
        let conn = acquire_lock(&self.conn);
        let mut stats = IndexStats {
            total: count_all(&conn)?,
            ..IndexStats::default()
        };

        let mut stmt = conn
            .prepare("SELECT namespace, count(*) FROM memories GROUP BY namespace")
            .map_err(index_err("stats"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(index_err("stats"))?;
        for row in rows {
            let (namespace, count) = row.map_err(index_err("stats"))?;
            stats
                .by_namespace
                .insert(namespace, u64::try_from(count).unwrap_or(0));
        }

        let mut stmt = conn
            .prepare("SELECT spec, count(*) FROM memories WHERE spec IS NOT NULL GROUP BY spec")
            .map_err(index_err("stats"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(index_err("stats"))?;
        for row in rows {
            let (spec, count) = row.map_err(index_err("stats"))?;
            stats.by_spec.insert(spec, u64::try_from(count).unwrap_or(0));
        }

        stats.last_sync = read_last_sync(&conn)?;
        stats.index_size_bytes = self
            .db_path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map_or(0, |m| m.len());

        Ok(stats)
    }

    /// Records the instant of the last successful sync.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] on write failure.
    pub fn set_last_sync(&self, when: DateTime<Utc>) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('last_sync', ?1)
             ON CONFLICT(key) DO UPDATE SET value = ?1",
            params![when.to_rfc3339()],
        )
        .map(|_| ())
        .map_err(index_err("set_last_sync"))
    }

    /// Returns the last successful sync instant, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] on query failure.
    pub fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = acquire_lock(&self.conn);
        read_last_sync(&conn)
    }

    /// Truncates every projection (full reindex prologue).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] when the transaction fails.
    pub fn clear_all(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        with_transaction(&conn, "clear_all", |conn| {
            conn.execute("DELETE FROM memories", [])?;
            conn.execute("DELETE FROM memories_fts", [])?;
            conn.execute("DELETE FROM memory_vectors", [])?;
            Ok(())
        })
    }

    /// Runs storage optimization: `ANALYZE` then `VACUUM`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] on failure.
    pub fn vacuum(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute_batch("ANALYZE;")
            .map_err(index_err("analyze"))?;
        conn.execute_batch("VACUUM;").map_err(index_err("vacuum"))
    }
}

/// Pager over all ids, `page_size` at a time, bounded memory.
pub struct IdPager<'a> {
    index: &'a MemoryIndex,
    last: Option<String>,
    page_size: usize,
    done: bool,
}

impl IdPager<'_> {
    /// Fetches the next page; empty when exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] on query failure.
    pub fn next_page(&mut self) -> Result<Vec<MemoryId>> {
        if self.done {
            return Ok(Vec::new());
        }
        let conn = acquire_lock(&self.index.conn);
        let mut stmt = conn
            .prepare(
                "SELECT id FROM memories WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
            )
            .map_err(index_err("iter_all_ids"))?;
        let rows = stmt
            .query_map(
                params![
                    self.last.as_deref().unwrap_or(""),
                    i64::try_from(self.page_size).unwrap_or(i64::MAX)
                ],
                |row| row.get::<_, String>(0),
            )
            .map_err(index_err("iter_all_ids"))?;

        let mut page = Vec::with_capacity(self.page_size);
        for row in rows {
            page.push(MemoryId::new(row.map_err(index_err("iter_all_ids"))?));
        }
        if page.len() < self.page_size {
            self.done = true;
        }
        if let Some(last) = page.last() {
            self.last = Some(last.as_str().to_string());
        }
        Ok(page)
    }

    /// Collects every remaining id (convenience for small indexes).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] on query failure.
    pub fn collect_all(mut self) -> Result<Vec<MemoryId>> {
        let mut all = Vec::new();
        loop {
            let page = self.next_page()?;
            if page.is_empty() {
                return Ok(all);
            }
            all.extend(page);
        }
    }
}

fn index_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> Error {
    move |e| Error::Index {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

fn row_exists(conn: &Connection, id: &MemoryId) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM memories WHERE id = ?1",
        params![id.as_str()],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(index_err("exists"))
}

fn count_all(conn: &Connection) -> Result<u64> {
    let count: i64 = conn
        .query_row("SELECT count(*) FROM memories", [], |row| row.get(0))
        .map_err(index_err("count"))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

fn read_last_sync(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'last_sync'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(index_err("last_sync"))?;
    Ok(raw
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

fn with_transaction<T>(
    conn: &Connection,
    operation: &'static str,
    f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
) -> Result<T> {
    conn.execute("BEGIN IMMEDIATE", [])
        .map_err(index_err(operation))?;
    match f(conn) {
        Ok(value) => {
            conn.execute("COMMIT", []).map_err(index_err(operation))?;
            Ok(value)
        },
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(Error::Index {
                operation: operation.to_string(),
                cause: e.to_string(),
            })
        },
    }
}

fn insert_rows(
    conn: &Connection,
    memory: &Memory,
    embedding: Option<&[f32]>,
) -> rusqlite::Result<()> {
    let now = current_timestamp();
    #[allow(clippy::cast_possible_wrap)]
    let now_i64 = now as i64;

    conn.execute(
        "INSERT INTO memories
         (id, commit_id, note_index, namespace, domain, summary, content, timestamp,
          spec, phase, tags, status, relates_to, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            memory.id.as_str(),
            memory.commit_id,
            i64::from(memory.index),
            memory.namespace.as_str(),
            memory.domain.as_str(),
            memory.summary,
            memory.content,
            memory.timestamp.timestamp(),
            memory.spec,
            memory.phase,
            join_csv(&memory.tags),
            memory.status.as_str(),
            join_csv(
                &memory
                    .relates_to
                    .iter()
                    .map(MemoryId::as_str)
                    .collect::<Vec<_>>()
            ),
            now_i64,
            now_i64,
        ],
    )?;

    conn.execute(
        "INSERT INTO memories_fts (id, summary, content) VALUES (?1, ?2, ?3)",
        params![memory.id.as_str(), memory.summary, memory.content],
    )?;

    if let Some(vector) = embedding {
        conn.execute(
            "INSERT INTO memory_vectors (id, embedding) VALUES (?1, ?2)",
            params![memory.id.as_str(), encode_embedding(vector)],
        )?;
    }

    Ok(())
}

fn delete_rows(conn: &Connection, id: &MemoryId) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM memories WHERE id = ?1", params![id.as_str()])?;
    conn.execute(
        "DELETE FROM memories_fts WHERE id = ?1",
        params![id.as_str()],
    )?;
    conn.execute(
        "DELETE FROM memory_vectors WHERE id = ?1",
        params![id.as_str()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::models::{Domain, MemoryStatus, Namespace};
    use chrono::TimeZone;

    fn memory(namespace: Namespace, commit: &str, index: u32, summary: &str) -> Memory {
        let mut m = Memory::at_index(namespace, commit, index, Domain::Project);
        m.summary = summary.to_string();
        m.content = format!("body of {summary}");
        m.timestamp = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        m
    }

    fn unit(index: usize, dims: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[index] = 1.0;
        v
    }

    #[test]
    fn test_insert_get_roundtrip() {
        let index = MemoryIndex::in_memory().unwrap();
        let mut m = memory(Namespace::Decisions, "abc1234def", 0, "Use PostgreSQL");
        m.spec = Some("storage".to_string());
        m.tags = vec!["db".to_string(), "arch".to_string()];
        m.relates_to = vec![MemoryId::new("research:abc1234:0")];

        index.insert(&m, Some(&unit(0, 8))).unwrap();

        let got = index.get(&m.id).unwrap().unwrap();
        assert_eq!(got, m);
        assert!(index.exists(&m.id).unwrap());
        assert!(!index.exists(&MemoryId::new("decisions:zzzzzzz:0")).unwrap());
    }

    #[test]
    fn test_insert_is_idempotent_on_collision() {
        let index = MemoryIndex::in_memory().unwrap();
        let m = memory(Namespace::Decisions, "abc1234def", 0, "original");
        index.insert(&m, None).unwrap();

        let mut clobber = m.clone();
        clobber.summary = "clobbered".to_string();
        index.insert(&clobber, None).unwrap();

        assert_eq!(index.get(&m.id).unwrap().unwrap().summary, "original");
    }

    #[test]
    fn test_update_rewrites_all_projections() {
        let index = MemoryIndex::in_memory().unwrap();
        let mut m = memory(Namespace::Decisions, "abc1234def", 0, "jwt tokens");
        index.insert(&m, Some(&unit(0, 8))).unwrap();

        m.summary = "connection pooling".to_string();
        m.status = MemoryStatus::Archived;
        index.update(&m, Some(&unit(1, 8))).unwrap();

        let got = index.get(&m.id).unwrap().unwrap();
        assert_eq!(got.summary, "connection pooling");
        assert_eq!(got.status, MemoryStatus::Archived);

        // FTS reflects the new summary, not the old one.
        let hits = index
            .search_text("pooling", 10, &SearchFilter::new())
            .unwrap();
        assert_eq!(hits.len(), 1);
        let hits = index.search_text("jwt", 10, &SearchFilter::new()).unwrap();
        assert!(hits.is_empty());

        // Vector moved too.
        let hits = index
            .search_vector(&unit(1, 8), 10, &SearchFilter::new())
            .unwrap();
        assert!((hits[0].1).abs() < 1e-6);
    }

    #[test]
    fn test_delete() {
        let index = MemoryIndex::in_memory().unwrap();
        let m = memory(Namespace::Decisions, "abc1234def", 0, "temp");
        index.insert(&m, Some(&unit(0, 8))).unwrap();

        assert!(index.delete(&m.id).unwrap());
        assert!(!index.delete(&m.id).unwrap());
        assert!(index.get(&m.id).unwrap().is_none());
        assert!(index
            .search_text("temp", 10, &SearchFilter::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_get_existing_ids() {
        let index = MemoryIndex::in_memory().unwrap();
        let a = memory(Namespace::Decisions, "abc1234def", 0, "a");
        let b = memory(Namespace::Decisions, "abc1234def", 1, "b");
        index.insert(&a, None).unwrap();
        index.insert(&b, None).unwrap();

        let ghost = MemoryId::new("decisions:zzzzzzz:9");
        let found = index
            .get_existing_ids(&[a.id.clone(), b.id.clone(), ghost.clone()])
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains(&a.id));
        assert!(!found.contains(&ghost));
    }

    #[test]
    fn test_search_vector_ranking_and_filters() {
        let index = MemoryIndex::in_memory().unwrap();
        let a = memory(Namespace::Decisions, "abc1234def", 0, "a");
        let mut b = memory(Namespace::Learnings, "def5678abc", 0, "b");
        b.domain = Domain::Project;
        index.insert(&a, Some(&unit(0, 4))).unwrap();
        index.insert(&b, Some(&unit(1, 4))).unwrap();

        let hits = index
            .search_vector(&unit(0, 4), 10, &SearchFilter::new())
            .unwrap();
        assert_eq!(hits[0].0, a.id);
        assert!(hits[0].1 < hits[1].1);

        let filtered = index
            .search_vector(
                &unit(0, 4),
                10,
                &SearchFilter::new().with_namespace(Namespace::Learnings),
            )
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].0, b.id);
    }

    #[test]
    fn test_search_text_bm25() {
        let index = MemoryIndex::in_memory().unwrap();
        let a = memory(Namespace::Decisions, "abc1234def", 0, "Use JWT for API auth");
        let b = memory(Namespace::Decisions, "abc1234def", 1, "Database pooling");
        index.insert(&a, None).unwrap();
        index.insert(&b, None).unwrap();

        let hits = index
            .search_text("jwt auth", 10, &SearchFilter::new())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, a.id);

        // Status filter applies.
        let hits = index
            .search_text(
                "jwt",
                10,
                &SearchFilter::new().with_status(MemoryStatus::Archived),
            )
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_text_hostile_query() {
        let index = MemoryIndex::in_memory().unwrap();
        let m = memory(Namespace::Decisions, "abc1234def", 0, "plain summary");
        index.insert(&m, None).unwrap();

        // FTS operators must not reach the parser.
        assert!(index
            .search_text("\"unbalanced OR (", 10, &SearchFilter::new())
            .is_ok());
        assert!(index
            .search_text("", 10, &SearchFilter::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_iter_all_ids_pagination() {
        let index = MemoryIndex::in_memory().unwrap();
        for i in 0..7 {
            let m = memory(Namespace::Decisions, "abc1234def", i, &format!("m{i}"));
            index.insert(&m, None).unwrap();
        }

        let mut pager = index.iter_all_ids(3);
        let mut total = 0;
        loop {
            let page = pager.next_page().unwrap();
            if page.is_empty() {
                break;
            }
            assert!(page.len() <= 3);
            total += page.len();
        }
        assert_eq!(total, 7);

        let all = index.iter_all_ids(3).collect_all().unwrap();
        assert_eq!(all.len(), 7);
        let mut sorted = all.clone();
        sorted.sort();
        assert_eq!(all, sorted);
    }

    #[test]
    fn test_stats_and_last_sync() {
        let index = MemoryIndex::in_memory().unwrap();
        let mut a = memory(Namespace::Decisions, "abc1234def", 0, "a");
        a.spec = Some("storage".to_string());
        let b = memory(Namespace::Learnings, "abc1234def", 0, "b");
        index.insert(&a, None).unwrap();
        index.insert(&b, None).unwrap();

        let stats = index.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_namespace.get("decisions"), Some(&1));
        assert_eq!(stats.by_namespace.get("learnings"), Some(&1));
        assert_eq!(stats.by_spec.get("storage"), Some(&1));
        assert!(stats.last_sync.is_none());

        let when = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        index.set_last_sync(when).unwrap();
        assert_eq!(index.last_sync().unwrap(), Some(when));
    }

    #[test]
    fn test_clear_all() {
        let index = MemoryIndex::in_memory().unwrap();
        let m = memory(Namespace::Decisions, "abc1234def", 0, "gone soon");
        index.insert(&m, Some(&unit(0, 4))).unwrap();

        index.clear_all().unwrap();
        assert_eq!(index.stats().unwrap().total, 0);
        assert!(index
            .search_vector(&unit(0, 4), 10, &SearchFilter::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_vacuum_runs() {
        let index = MemoryIndex::in_memory().unwrap();
        index.vacuum().unwrap();
    }
}
