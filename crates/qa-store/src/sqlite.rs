//! SQLite-based storage implementation.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use qa_core::{
    content_hash, DatabaseConfig, Document, InsertOutcome, QaError, Result, ScoredDocument,
    StoreStats, VectorStore,
};

use crate::pool::ConnectionPool;
use crate::schema::{META_DIMENSION, META_SCHEMA_VERSION, SCHEMA, SCHEMA_VERSION};

/// SQLite-based vector store.
///
/// Similarity search is an exact inner-product scan over every stored
/// embedding. Each operation checks a connection out of a small pool and
/// runs on the blocking thread pool via `spawn_blocking`.
pub struct SqliteStore {
    pool: Arc<ConnectionPool>,

    /// Embedding dimension fixed when the database was created.
    dimension: usize,

    path: PathBuf,
}

impl SqliteStore {
    /// Open or create a database at the given path with default settings.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let config = DatabaseConfig {
            path: path.as_ref().to_path_buf(),
            ..DatabaseConfig::default()
        };
        Self::from_config(&config, dimension)
    }

    /// Open or create the database described by `config`.
    pub fn from_config(config: &DatabaseConfig, dimension: usize) -> Result<Self> {
        let path = config.path.as_path();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = ConnectionPool::file(
            path.to_path_buf(),
            config.max_idle_connections,
            config.cache_size,
            config.busy_timeout_ms,
        )?;
        Self::init(pool, dimension, path)
    }

    /// Open an in-memory database (for testing and throwaway runs).
    pub fn open_memory(dimension: usize) -> Result<Self> {
        let pool = ConnectionPool::memory(DatabaseConfig::default().max_idle_connections)?;
        Self::init(pool, dimension, Path::new(":memory:"))
    }

    fn init(pool: Arc<ConnectionPool>, dimension: usize, path: &Path) -> Result<Self> {
        if dimension == 0 {
            return Err(QaError::invalid_argument("embedding dimension must be non-zero"));
        }

        {
            let conn = pool.get()?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| QaError::database(format!("Failed to initialize schema: {}", e)))?;
            Self::check_dimension(&conn, dimension)?;
        }

        info!("Database opened at {:?} (dimension {})", path, dimension);

        Ok(Self {
            pool,
            dimension,
            path: path.to_path_buf(),
        })
    }

    /// Record the dimension on first open; reject a different one later.
    fn check_dimension(conn: &Connection, dimension: usize) -> Result<()> {
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = ?1",
                params![META_DIMENSION],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| QaError::database(e.to_string()))?;

        match stored {
            Some(value) => {
                let expected: usize = value.parse().map_err(|_| {
                    QaError::database(format!("Corrupt stored dimension: {}", value))
                })?;
                if expected != dimension {
                    return Err(QaError::DimensionMismatch {
                        expected,
                        actual: dimension,
                    });
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO store_meta (key, value) VALUES (?1, ?2), (?3, ?4)",
                    params![
                        META_DIMENSION,
                        dimension.to_string(),
                        META_SCHEMA_VERSION,
                        SCHEMA_VERSION.to_string()
                    ],
                )
                .map_err(|e| QaError::database(format!("Failed to write store metadata: {}", e)))?;
            }
        }

        Ok(())
    }

    /// Path the store was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a closure against a pooled connection on the blocking pool.
    async fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| QaError::internal(format!("Store task failed: {}", e)))?
    }

    fn check_embedding(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(QaError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(QaError::invalid_argument("embedding contains non-finite values"));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, doc: Document) -> Result<InsertOutcome> {
        if doc.id.is_empty() {
            return Err(QaError::invalid_argument("document id must not be empty"));
        }
        self.check_embedding(&doc.embedding)?;

        let hash = content_hash(&doc.text);
        let embedding = vec_to_bytes(&doc.embedding);

        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| QaError::database(e.to_string()))?;

            let existing: Option<Option<Vec<u8>>> = tx
                .query_row(
                    "SELECT content_hash FROM documents WHERE id = ?1",
                    params![doc.id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| QaError::database(e.to_string()))?;

            let outcome = match existing {
                Some(Some(stored)) if stored.as_slice() == hash.as_slice() => {
                    debug!("Document unchanged: {}", doc.id);
                    return Ok(InsertOutcome::Unchanged);
                }
                Some(_) => {
                    tx.execute(
                        r#"
                        UPDATE documents
                        SET text = ?2, embedding = ?3, content_hash = ?4, updated_at = ?5
                        WHERE id = ?1
                        "#,
                        params![doc.id, doc.text, embedding, hash.as_slice(), doc.created_at as i64],
                    )
                    .map_err(|e| QaError::database(format!("Failed to update document: {}", e)))?;
                    InsertOutcome::Updated
                }
                None => {
                    tx.execute(
                        r#"
                        INSERT INTO documents (id, text, embedding, content_hash, created_at, updated_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                        "#,
                        params![doc.id, doc.text, embedding, hash.as_slice(), doc.created_at as i64],
                    )
                    .map_err(|e| QaError::database(format!("Failed to insert document: {}", e)))?;
                    InsertOutcome::Inserted
                }
            };

            tx.commit()
                .map_err(|e| QaError::database(e.to_string()))?;

            debug!("Upserted document {}: {:?}", doc.id, outcome);
            Ok(outcome)
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                r#"
                SELECT id, text, embedding, content_hash, created_at
                FROM documents WHERE id = ?1
                "#,
                params![id],
                row_to_document,
            )
            .optional()
            .map_err(|e| QaError::database(e.to_string()))
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let deleted = conn
                .execute("DELETE FROM documents WHERE id = ?1", params![id])
                .map_err(|e| QaError::database(e.to_string()))?;

            if deleted == 0 {
                return Err(QaError::DocumentNotFound { id });
            }

            debug!("Deleted document: {}", id);
            Ok(())
        })
        .await
    }

    async fn top_k(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredDocument>> {
        self.check_embedding(embedding)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let query = embedding.to_vec();
        let dimension = self.dimension;

        self.with_conn(move |conn| {
            // First pass: score every embedding, keeping the best k.
            let mut heap: BinaryHeap<Reverse<Hit>> = BinaryHeap::with_capacity(k + 1);
            {
                let mut stmt = conn
                    .prepare("SELECT id, embedding FROM documents")
                    .map_err(|e| QaError::database(e.to_string()))?;
                let mut rows = stmt
                    .query([])
                    .map_err(|e| QaError::database(e.to_string()))?;

                while let Some(row) = rows.next().map_err(|e| QaError::database(e.to_string()))? {
                    let id: String = row.get(0).map_err(|e| QaError::database(e.to_string()))?;
                    let blob: Vec<u8> = row.get(1).map_err(|e| QaError::database(e.to_string()))?;

                    let stored = bytes_to_vec(&blob)
                        .filter(|v| v.len() == dimension)
                        .ok_or_else(|| {
                            QaError::database(format!("Corrupt embedding for document {}", id))
                        })?;

                    let hit = Hit {
                        similarity: dot(&query, &stored),
                        id,
                    };

                    if heap.len() < k {
                        heap.push(Reverse(hit));
                    } else if heap.peek().is_some_and(|worst| hit > worst.0) {
                        heap.pop();
                        heap.push(Reverse(hit));
                    }
                }
            }

            // Best first.
            let mut hits: Vec<Hit> = heap.into_iter().map(|Reverse(h)| h).collect();
            hits.sort_by(|a, b| b.cmp(a));

            // Second pass: load the winners.
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, text, embedding, content_hash, created_at
                    FROM documents WHERE id = ?1
                    "#,
                )
                .map_err(|e| QaError::database(e.to_string()))?;

            let mut results = Vec::with_capacity(hits.len());
            for hit in hits {
                let document = stmt
                    .query_row(params![hit.id], row_to_document)
                    .map_err(|e| QaError::database(e.to_string()))?;
                results.push(ScoredDocument {
                    document,
                    similarity: hit.similarity,
                });
            }

            debug!("top_k returned {} of requested {}", results.len(), k);
            Ok(results)
        })
        .await
    }

    async fn stats(&self) -> Result<StoreStats> {
        let dimension = self.dimension;
        self.with_conn(move |conn| {
            let documents: u64 = conn
                .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
                .map_err(|e| QaError::database(e.to_string()))?;

            // Get page count and page size to estimate storage
            let page_count: u64 = conn
                .query_row("PRAGMA page_count", [], |row| row.get(0))
                .unwrap_or(0);
            let page_size: u64 = conn
                .query_row("PRAGMA page_size", [], |row| row.get(0))
                .unwrap_or(4096);

            Ok(StoreStats {
                documents,
                dimension,
                storage_bytes: page_count * page_size,
            })
        })
        .await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// A scored id during the scan. Orders by similarity, then by id with the
/// smaller id ranking higher, so equal similarities come out id-ascending.
#[derive(Debug, Clone, PartialEq)]
struct Hit {
    similarity: f32,
    id: String,
}

impl Eq for Hit {}

impl Ord for Hit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.similarity
            .total_cmp(&other.similarity)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Hit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let blob: Vec<u8> = row.get(2)?;
    let content_hash: Option<Vec<u8>> = row.get(3)?;

    Ok(Document {
        id: row.get(0)?,
        text: row.get(1)?,
        embedding: bytes_to_vec(&blob).unwrap_or_default(),
        content_hash: content_hash.and_then(|v| v.try_into().ok()),
        created_at: row.get::<_, i64>(4)? as u64,
    })
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Convert f32 vector to bytes (little-endian).
fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_bytes`]; `None` if the length is not a multiple of 4.
fn bytes_to_vec(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str, embedding: Vec<f32>) -> Document {
        Document::new(id, text, embedding)
    }

    #[tokio::test]
    async fn test_open_memory() {
        let store = SqliteStore::open_memory(4).unwrap();
        assert_eq!(store.dimension(), 4);
        assert_eq!(store.stats().await.unwrap().documents, 0);
    }

    #[tokio::test]
    async fn test_document_crud() {
        let store = SqliteStore::open_memory(3).unwrap();

        let outcome = store
            .upsert(doc("paris", "Paris is the capital of France.", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);

        let retrieved = store.get("paris").await.unwrap().unwrap();
        assert_eq!(retrieved.text, "Paris is the capital of France.");
        assert_eq!(retrieved.embedding, vec![1.0, 0.0, 0.0]);
        assert!(retrieved.content_hash.is_some());

        store.delete("paris").await.unwrap();
        assert!(store.get("paris").await.unwrap().is_none());

        let err = store.delete("paris").await.unwrap_err();
        assert!(matches!(err, QaError::DocumentNotFound { .. }));
    }

    #[tokio::test]
    async fn test_upsert_outcomes() {
        let store = SqliteStore::open_memory(2).unwrap();

        let first = store.upsert(doc("a", "alpha", vec![1.0, 0.0])).await.unwrap();
        let same = store.upsert(doc("a", "alpha", vec![1.0, 0.0])).await.unwrap();
        let changed = store.upsert(doc("a", "alpha prime", vec![0.0, 1.0])).await.unwrap();

        assert_eq!(first, InsertOutcome::Inserted);
        assert_eq!(same, InsertOutcome::Unchanged);
        assert_eq!(changed, InsertOutcome::Updated);

        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.text, "alpha prime");
        assert_eq!(stored.embedding, vec![0.0, 1.0]);
        assert_eq!(store.stats().await.unwrap().documents, 1);
    }

    #[tokio::test]
    async fn test_dimension_enforced() {
        let store = SqliteStore::open_memory(3).unwrap();

        let err = store.upsert(doc("a", "alpha", vec![1.0, 0.0])).await.unwrap_err();
        assert!(matches!(
            err,
            QaError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));

        let err = store.top_k(&[1.0, 0.0, 0.0, 0.0], 5).await.unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_top_k_orders_by_inner_product() {
        let store = SqliteStore::open_memory(2).unwrap();
        store.upsert(doc("low", "low", vec![0.1, 0.0])).await.unwrap();
        store.upsert(doc("high", "high", vec![0.9, 0.1])).await.unwrap();
        store.upsert(doc("mid", "mid", vec![0.5, 0.5])).await.unwrap();
        store.upsert(doc("neg", "neg", vec![-1.0, 0.0])).await.unwrap();

        let results = store.top_k(&[1.0, 0.0], 3).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.document.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
        assert!((results[0].similarity - 0.9).abs() < 1e-6);
        assert!(results.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[tokio::test]
    async fn test_top_k_ties_break_by_id() {
        let store = SqliteStore::open_memory(2).unwrap();
        for id in ["c", "a", "b"] {
            store.upsert(doc(id, id, vec![0.5, 0.5])).await.unwrap();
        }

        let results = store.top_k(&[1.0, 1.0], 2).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.document.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_top_k_fewer_documents_than_k() {
        let store = SqliteStore::open_memory(2).unwrap();
        assert!(store.top_k(&[1.0, 0.0], 25).await.unwrap().is_empty());

        store.upsert(doc("only", "only", vec![1.0, 0.0])).await.unwrap();
        assert_eq!(store.top_k(&[1.0, 0.0], 25).await.unwrap().len(), 1);
        assert!(store.top_k(&[1.0, 0.0], 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_non_finite_embedding() {
        let store = SqliteStore::open_memory(2).unwrap();
        let err = store
            .upsert(doc("nan", "nan", vec![f32::NAN, 0.0]))
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("documents.db");

        {
            let store = SqliteStore::open(&path, 2).unwrap();
            store.upsert(doc("a", "alpha", vec![1.0, 0.0])).await.unwrap();
        }

        let store = SqliteStore::open(&path, 2).unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().text, "alpha");
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert!(stats.storage_bytes > 0);

        drop(store);
        let err = SqliteStore::open(&path, 3).err().unwrap();
        assert!(matches!(
            err,
            QaError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_embedding_bytes() {
        let v = vec![1.5f32, -0.25, 0.0];
        assert_eq!(bytes_to_vec(&vec_to_bytes(&v)).unwrap(), v);
        assert!(bytes_to_vec(&[0u8; 5]).is_none());
    }
}
