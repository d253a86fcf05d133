//! Shared `SQLite` plumbing: connection profile, SQL helpers, row mapping.

mod connection;
mod row;
mod sql;

pub use connection::{acquire_lock, configure_connection};
pub use row::{
    MEMORY_COLUMNS, MemoryRow, build_memory_from_row, decode_embedding, encode_embedding,
    join_csv,
};
pub use sql::{build_filter_clause, sanitize_fts_query};
