//! Similarity search and document ingestion.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use qa_core::{
    Document, Embedder, InsertOutcome, QaError, Query, Result, StoreStats, VectorStore,
};

/// Documents embedded per model call during ingestion.
const INGEST_BATCH: usize = 32;

/// One similarity search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// 1-based position.
    pub rank: usize,
    pub similarity: f32,
    pub id: String,
    pub text: String,
}

/// Similarity search results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub results: Vec<SearchHit>,
    pub latency_ms: u64,
}

/// Outcome counts of a batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl IngestReport {
    fn record(&mut self, outcome: InsertOutcome) {
        match outcome {
            InsertOutcome::Inserted => self.inserted += 1,
            InsertOutcome::Updated => self.updated += 1,
            InsertOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Fail unless the embedder produces vectors the store accepts.
pub fn ensure_dimensions(store: &dyn VectorStore, embedder: &dyn Embedder) -> Result<()> {
    if store.dimension() != embedder.dimension() {
        return Err(QaError::DimensionMismatch {
            expected: store.dimension(),
            actual: embedder.dimension(),
        });
    }
    Ok(())
}

/// Search and ingestion over the vector store.
///
/// Documents are embedded with the same embedder the query pipeline uses,
/// so stored and query vectors always share a space.
pub struct SearchEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl SearchEngine {
    /// Create a new search engine.
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        ensure_dimensions(store.as_ref(), embedder.as_ref())?;
        Ok(Self { store, embedder })
    }

    /// Top `query.k` documents by similarity alone.
    pub async fn search(&self, query: &Query) -> Result<SearchResults> {
        let start = Instant::now();

        info!("Searching for: {:?}", query.text);

        let embedding = self.embedder.embed_query(&query.text).await?;
        let hits = self.store.top_k(&embedding, query.k).await?;

        let results: Vec<SearchHit> = hits
            .into_iter()
            .enumerate()
            .map(|(i, hit)| SearchHit {
                rank: i + 1,
                similarity: hit.similarity,
                id: hit.document.id,
                text: hit.document.text,
            })
            .collect();

        let latency_ms = start.elapsed().as_millis() as u64;

        info!(
            "Search completed in {}ms, returned {} results",
            latency_ms,
            results.len()
        );

        Ok(SearchResults {
            query: query.text.clone(),
            results,
            latency_ms,
        })
    }

    /// Embed and store one document. Unchanged text is not re-embedded.
    pub async fn insert(&self, id: &str, text: &str) -> Result<InsertOutcome> {
        validate_document(id, text)?;

        if let Some(existing) = self.store.get(id).await? {
            if !existing.content_changed(text) {
                debug!("Skipping unchanged document: {}", id);
                return Ok(InsertOutcome::Unchanged);
            }
        }

        let embedding = self.embedder.embed_documents(&[text]).await?;
        let embedding = embedding
            .into_iter()
            .next()
            .ok_or_else(|| QaError::embedding("No embedding returned"))?;

        self.store.upsert(Document::new(id, text, embedding)).await
    }

    /// Embed and store many `(id, text)` documents, batching model calls.
    pub async fn insert_batch(&self, documents: &[(String, String)]) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let mut pending: Vec<&(String, String)> = Vec::new();

        for doc in documents {
            validate_document(&doc.0, &doc.1)?;
            match self.store.get(&doc.0).await? {
                Some(existing) if !existing.content_changed(&doc.1) => {
                    report.record(InsertOutcome::Unchanged)
                }
                _ => pending.push(doc),
            }
        }

        for batch in pending.chunks(INGEST_BATCH) {
            let texts: Vec<&str> = batch.iter().map(|(_, text)| text.as_str()).collect();
            let embeddings = self.embedder.embed_documents(&texts).await?;
            if embeddings.len() != batch.len() {
                return Err(QaError::embedding(format!(
                    "Embedder returned {} vectors for {} texts",
                    embeddings.len(),
                    batch.len()
                )));
            }

            for ((id, text), embedding) in batch.iter().map(|d| (&d.0, &d.1)).zip(embeddings) {
                report.record(self.store.upsert(Document::new(id, text, embedding)).await?);
            }
            debug!("Ingested batch of {}", batch.len());
        }

        info!(
            "Ingest finished: {} inserted, {} updated, {} unchanged",
            report.inserted, report.updated, report.unchanged
        );
        Ok(report)
    }

    /// Remove a document.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id).await
    }

    /// Store statistics.
    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }
}

fn validate_document(id: &str, text: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(QaError::invalid_argument("document id must not be empty"));
    }
    if text.trim().is_empty() {
        return Err(QaError::invalid_argument(format!(
            "document {} has empty text",
            id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qa_embed::MockEmbedder;
    use qa_store::SqliteStore;

    fn engine() -> SearchEngine {
        SearchEngine::new(
            Arc::new(SqliteStore::open_memory(64).unwrap()),
            Arc::new(MockEmbedder::with_dimension(64)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_search() {
        let engine = engine();
        engine
            .insert("paris", "Paris is the capital of France.")
            .await
            .unwrap();
        engine
            .insert("jupiter", "Jupiter is the largest planet.")
            .await
            .unwrap();

        let query = Query::new("capital of France", Some(1)).unwrap();
        let results = engine.search(&query).await.unwrap();

        assert_eq!(results.results.len(), 1);
        assert_eq!(results.results[0].id, "paris");
        assert_eq!(results.results[0].rank, 1);
    }

    #[tokio::test]
    async fn test_insert_skips_unchanged() {
        let engine = engine();
        assert_eq!(
            engine.insert("a", "alpha beta").await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            engine.insert("a", "alpha beta").await.unwrap(),
            InsertOutcome::Unchanged
        );
        assert_eq!(
            engine.insert("a", "alpha gamma").await.unwrap(),
            InsertOutcome::Updated
        );
    }

    #[tokio::test]
    async fn test_insert_batch_report() {
        let engine = engine();
        engine.insert("a", "alpha").await.unwrap();

        let docs: Vec<(String, String)> = (0..40)
            .map(|i| (format!("doc-{}", i), format!("document number {}", i)))
            .chain([("a".to_string(), "alpha".to_string())])
            .collect();

        let report = engine.insert_batch(&docs).await.unwrap();
        assert_eq!(
            report,
            IngestReport {
                inserted: 40,
                updated: 0,
                unchanged: 1
            }
        );
        assert_eq!(engine.stats().await.unwrap().documents, 41);
    }

    #[tokio::test]
    async fn test_rejects_empty_document() {
        let engine = engine();
        assert!(engine.insert("", "text").await.unwrap_err().is_client_error());
        assert!(engine.insert("id", "  ").await.unwrap_err().is_client_error());
    }

    #[test]
    fn test_dimension_mismatch() {
        let result = SearchEngine::new(
            Arc::new(SqliteStore::open_memory(64).unwrap()),
            Arc::new(MockEmbedder::with_dimension(32)),
        );
        assert!(matches!(
            result.err().unwrap(),
            QaError::DimensionMismatch {
                expected: 64,
                actual: 32
            }
        ));
    }
}
