//! Storage layer: the derived `SQLite` index and its plumbing.

mod index;
pub mod migrations;
pub mod sqlite;

pub use index::{IdPager, MemoryIndex};
