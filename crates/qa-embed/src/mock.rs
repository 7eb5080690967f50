//! Lexical stand-ins for the model collaborators.
//!
//! They need no model files and are fully deterministic, which makes them
//! useful for tests and for trying the pipeline end to end.

use std::collections::HashSet;

use async_trait::async_trait;

use qa_core::{Embedder, Reranker, Result};

use crate::model::l2_normalize;

const DEFAULT_DIMENSION: usize = 384;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "how", "in", "is", "it", "of",
    "on", "or", "that", "the", "this", "to", "was", "what", "when", "where", "which", "who", "why",
    "with",
];

/// Lowercased content words of `text`.
fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
}

/// 64-bit FNV-1a.
fn fnv1a(term: &str) -> u64 {
    term.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Hashed bag-of-words embedder.
///
/// Each content word increments one bucket; the vector is L2-normalized,
/// so the inner product of two embeddings is the cosine similarity of
/// their word counts.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    /// Create a new mock embedder with default settings.
    pub fn new() -> Self {
        Self::with_dimension(DEFAULT_DIMENSION)
    }

    /// Create a mock embedder producing `dimension`-long vectors.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        for term in terms(text) {
            embedding[(fnv1a(&term) % self.dimension as u64) as usize] += 1.0;
        }
        l2_normalize(&mut embedding);
        embedding
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Term-overlap reranker: the share of the query's content words found in
/// each text.
#[derive(Default)]
pub struct MockReranker;

impl MockReranker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Reranker for MockReranker {
    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>> {
        let query_terms: HashSet<String> = terms(query).collect();
        if query_terms.is_empty() {
            return Ok(vec![0.0; texts.len()]);
        }

        Ok(texts
            .iter()
            .map(|text| {
                let text_terms: HashSet<String> = terms(text).collect();
                let hits = query_terms.intersection(&text_terms).count();
                hits as f32 / query_terms.len() as f32
            })
            .collect())
    }
}
