//! Core traits defining the collaborator boundaries of the pipeline.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::types::{Document, InsertOutcome, ScoredDocument, StoreStats};

/// Incremental generator output. Each item is one token, or the failure
/// that ended generation.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Document storage with inner-product similarity search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace a document. Its embedding must have the store's
    /// dimension.
    async fn upsert(&self, doc: Document) -> Result<InsertOutcome>;

    /// Fetch a document by id.
    async fn get(&self, id: &str) -> Result<Option<Document>>;

    /// Delete a document by id.
    async fn delete(&self, id: &str) -> Result<()>;

    /// The `k` documents with the highest inner product against
    /// `embedding`, similarity-descending.
    async fn top_k(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredDocument>>;

    /// Store statistics.
    async fn stats(&self) -> Result<StoreStats>;

    /// Embedding dimension accepted by the store.
    fn dimension(&self) -> usize;
}

/// Text embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of document texts.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}

/// Pairwise relevance model (cross-encoder).
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score each text against the query. Returns one score per text, in
    /// input order; higher is more relevant.
    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>>;
}

/// Text generator.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Start generating a continuation of `prompt`.
    ///
    /// Errors returned here happen before any token is produced; failures
    /// after that arrive as `Err` items on the stream. Dropping the stream
    /// cancels generation.
    async fn generate(&self, prompt: &str) -> Result<TokenStream>;
}
