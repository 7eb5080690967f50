//! qa-store - SQLite document and embedding store
//!
//! This crate persists documents together with their embeddings and answers
//! exact inner-product top-k queries over them.

mod pool;
mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

// Re-export schema for testing/migrations
pub use schema::{SCHEMA, SCHEMA_VERSION};
