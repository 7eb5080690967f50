//! qa-embed - Embedding and reranking models
//!
//! This crate provides the two model collaborators used before generation:
//!
//! - [`OnnxEmbedder`]: bi-encoder text embeddings (bge-micro by default)
//! - [`OnnxReranker`]: cross-encoder relevance scores for (query, text) pairs
//!
//! Both run ONNX Runtime sessions on the blocking thread pool. Lexical
//! [`MockEmbedder`] and [`MockReranker`] stand in when no model files are
//! available.

mod mock;
pub mod model;
mod onnx;
mod rerank;

use std::sync::Arc;

pub use mock::{MockEmbedder, MockReranker};
pub use onnx::OnnxEmbedder;
pub use rerank::OnnxReranker;

// Re-export the traits for convenience
pub use qa_core::{Embedder, Reranker};

use qa_core::{EmbeddingConfig, ModelBackend, RerankerConfig, Result};

/// Build the embedder selected by `config`.
pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.backend {
        ModelBackend::Onnx => Ok(Arc::new(OnnxEmbedder::from_config(config)?)),
        ModelBackend::Mock => Ok(Arc::new(MockEmbedder::with_dimension(config.dimension))),
    }
}

/// Build the reranker selected by `config`.
pub fn reranker_from_config(config: &RerankerConfig) -> Result<Arc<dyn Reranker>> {
    match config.backend {
        ModelBackend::Onnx => Ok(Arc::new(OnnxReranker::from_config(config)?)),
        ModelBackend::Mock => Ok(Arc::new(MockReranker::new())),
    }
}
