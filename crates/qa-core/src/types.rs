//! Core domain types for the QA pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{QaError, Result};

/// Number of documents used as grounding context when a query omits `k`.
pub const DEFAULT_K: usize = 3;

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable external identifier.
    pub id: String,

    /// Content answers are grounded in.
    pub text: String,

    /// Embedding computed by the configured embedder.
    #[serde(skip, default)]
    pub embedding: Vec<f32>,

    /// Blake3 hash of `text`.
    #[serde(with = "hex_hash", default)]
    pub content_hash: Option<[u8; 32]>,

    /// Creation timestamp (Unix millis).
    #[serde(default)]
    pub created_at: u64,
}

impl Document {
    /// Create a new document with its embedding.
    pub fn new(id: &str, text: &str, embedding: Vec<f32>) -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            id: id.to_string(),
            text: text.to_string(),
            embedding,
            content_hash: Some(content_hash(text)),
            created_at: now,
        }
    }

    /// Check if the text differs from what is stored.
    pub fn content_changed(&self, new_text: &str) -> bool {
        self.content_hash
            .map(|h| h != content_hash(new_text))
            .unwrap_or(true)
    }
}

/// Blake3 hash of a document text.
pub fn content_hash(text: &str) -> [u8; 32] {
    *blake3::hash(text.as_bytes()).as_bytes()
}

/// A document returned by a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDocument {
    /// The matched document.
    pub document: Document,

    /// Inner product between the query and the document embedding.
    pub similarity: f32,
}

/// Result of inserting a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Statistics about the document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of stored documents.
    pub documents: u64,

    /// Embedding dimension enforced by the store.
    pub dimension: usize,

    /// Database size in bytes.
    pub storage_bytes: u64,
}

/// A validated question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// The question text (trimmed, never empty).
    pub text: String,

    /// Number of documents to keep as grounding context.
    pub k: usize,
}

impl Query {
    /// Validate and build a query. `k` defaults to [`DEFAULT_K`].
    pub fn new(text: impl Into<String>, k: Option<usize>) -> Result<Self> {
        let text = text.into();
        let text = text.trim();
        if text.is_empty() {
            return Err(QaError::invalid_argument("query text must not be empty"));
        }

        let k = k.unwrap_or(DEFAULT_K);
        if k < 1 {
            return Err(QaError::invalid_argument("k must be at least 1"));
        }

        Ok(Self {
            text: text.to_string(),
            k,
        })
    }

    /// Reject queries asking for more than `max_k` documents.
    pub fn ensure_max_k(&self, max_k: usize) -> Result<()> {
        if self.k > max_k {
            return Err(QaError::invalid_argument(format!(
                "k must be at most {}, got {}",
                max_k, self.k
            )));
        }
        Ok(())
    }
}

/// A document and its position in the vector store ordering.
#[derive(Debug, Clone)]
pub struct RetrievalCandidate {
    pub document: Document,

    /// 1-based similarity rank.
    pub rank: usize,

    pub similarity: f32,
}

/// A document and its position in the reranker ordering.
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub document: Document,

    /// 1-based relevance rank.
    pub rank: usize,

    pub score: f32,
}

/// A document with its reciprocal rank fusion score.
#[derive(Debug, Clone)]
pub struct FusedResult {
    pub document: Document,

    /// Sum of `1 / (c + rank)` over both rankings.
    pub score: f64,

    /// Rank in the vector store ordering.
    pub initial_rank: usize,

    /// Rank in the reranker ordering.
    pub rerank_rank: usize,
}

/// Pipeline state for a single query.
///
/// Progression is linear; `Failed` is reachable from any non-terminal state.
/// An empty retrieval goes straight to `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Start,
    Embedding,
    Retrieval,
    Reranking,
    Fusion,
    Prompting,
    Generating,
    Done,
    Failed,
}

impl PipelineState {
    /// The state following this one on the success path.
    pub fn next(self) -> Self {
        match self {
            Self::Start => Self::Embedding,
            Self::Embedding => Self::Retrieval,
            Self::Retrieval => Self::Reranking,
            Self::Reranking => Self::Fusion,
            Self::Fusion => Self::Prompting,
            Self::Prompting => Self::Generating,
            Self::Generating | Self::Done => Self::Done,
            Self::Failed => Self::Failed,
        }
    }

    /// Whether the state ends the execution.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Lowercase state name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Embedding => "embedding",
            Self::Retrieval => "retrieval",
            Self::Reranking => "reranking",
            Self::Fusion => "fusion",
            Self::Prompting => "prompting",
            Self::Generating => "generating",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured payload of an error event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable error code (see `QaError::error_code`).
    pub code: String,

    /// Stage that was running when the failure happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Human-readable reason.
    pub message: String,
}

impl ErrorPayload {
    /// Build a payload for an error raised while in `stage`.
    pub fn from_error(error: &QaError, stage: PipelineState) -> Self {
        Self {
            code: error.error_code().to_string(),
            stage: Some(stage.as_str().to_string()),
            message: error.to_string(),
        }
    }
}

/// One unit of the answer stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Human-readable progress update.
    Status(String),

    /// A piece of generated text.
    Token(String),

    /// Terminal failure.
    Error(ErrorPayload),

    /// Terminal success.
    Done,
}

impl StreamEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Done)
    }

    /// Token text, if this is a token event.
    pub fn as_token(&self) -> Option<&str> {
        match self {
            Self::Token(t) => Some(t),
            _ => None,
        }
    }
}

/// Hex serialization for optional content hashes.
mod hex_hash {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<[u8; 32]>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => hex::encode(bytes).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(hex) => {
                let bytes = hex::decode(&hex).map_err(serde::de::Error::custom)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("invalid hash length"))?;
                Ok(Some(arr))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults_k() {
        let query = Query::new("  What is RRF?  ", None).unwrap();
        assert_eq!(query.text, "What is RRF?");
        assert_eq!(query.k, DEFAULT_K);
    }

    #[test]
    fn test_query_rejects_empty_text() {
        let err = Query::new("   ", Some(3)).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_query_rejects_zero_k() {
        assert!(Query::new("question", Some(0)).is_err());
    }

    #[test]
    fn test_query_max_k() {
        let query = Query::new("question", Some(10)).unwrap();
        assert!(query.ensure_max_k(10).is_ok());
        assert!(query.ensure_max_k(9).is_err());
    }

    #[test]
    fn test_document_content_changed() {
        let doc = Document::new("doc-1", "Paris is the capital of France.", vec![0.0; 4]);
        assert!(!doc.content_changed("Paris is the capital of France."));
        assert!(doc.content_changed("Lyon is in France."));
    }

    #[test]
    fn test_document_serde_skips_embedding() {
        let doc = Document::new("doc-1", "text", vec![1.0, 2.0]);
        let json = serde_json::to_string(&doc).unwrap();
        assert!(!json.contains("embedding"));

        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content_hash, doc.content_hash);
        assert!(back.embedding.is_empty());
    }

    #[test]
    fn test_pipeline_state_progression() {
        let mut state = PipelineState::Start;
        let mut seen = vec![state];
        while !state.is_terminal() {
            state = state.next();
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                PipelineState::Start,
                PipelineState::Embedding,
                PipelineState::Retrieval,
                PipelineState::Reranking,
                PipelineState::Fusion,
                PipelineState::Prompting,
                PipelineState::Generating,
                PipelineState::Done,
            ]
        );
        assert_eq!(PipelineState::Failed.next(), PipelineState::Failed);
    }

    #[test]
    fn test_error_payload_from_error() {
        let payload = ErrorPayload::from_error(
            &QaError::embedding("model unavailable"),
            PipelineState::Embedding,
        );
        assert_eq!(payload.code, "EMBEDDING_ERROR");
        assert_eq!(payload.stage.as_deref(), Some("embedding"));
        assert!(payload.message.contains("model unavailable"));
    }
}
