//! Database schema definitions.

/// Main schema SQL for initializing the database.
pub const SCHEMA: &str = r#"
-- Documents with their embeddings (little-endian f32 BLOB)
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL,
    content_hash BLOB,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Store-wide settings fixed at creation time
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;

/// `store_meta` key holding the embedding dimension.
pub const META_DIMENSION: &str = "dimension";

/// `store_meta` key holding the schema version.
pub const META_SCHEMA_VERSION: &str = "schema_version";
