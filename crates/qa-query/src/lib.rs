//! qa-query - Retrieval, fusion and answer streaming
//!
//! Given a question, the [`Pipeline`] embeds it, pulls a fixed pool of
//! candidates from the vector store, rescores them with a cross-encoder,
//! combines both orderings with Reciprocal Rank Fusion and streams a
//! generated answer grounded in the top `k` documents.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! let pipeline = Arc::new(Pipeline::new(store, embedder, reranker, generator, config)?);
//! let query = pipeline.query("What is the capital of France?", None)?;
//! let mut events = pipeline.answer(query);
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event);
//! }
//! ```

mod engine;
mod fusion;
mod pipeline;
mod prompt;

pub use engine::{ensure_dimensions, IngestReport, SearchEngine, SearchHit, SearchResults};
pub use fusion::{
    fuse, initial_ranks, reciprocal_rank_fusion, rerank, rerank_ranks, RankMap,
    DEFAULT_FUSION_CONSTANT,
};
pub use pipeline::{Pipeline, NO_RESULTS_MESSAGE};
pub use prompt::build_prompt;
