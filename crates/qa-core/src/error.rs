//! Error types for the QA pipeline.

use thiserror::Error;

/// Result type alias using QaError.
pub type Result<T> = std::result::Result<T, QaError>;

/// Errors that can occur anywhere in the QA system.
#[derive(Error, Debug)]
pub enum QaError {
    /// Invalid argument provided by a caller.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Document not found.
    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    /// Embedding length does not match the store dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// Embedding model error.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// Reranker model error.
    #[error("Rerank error: {message}")]
    Rerank { message: String },

    /// Generator error (local model or remote service).
    #[error("Generation error: {message}")]
    Generation { message: String },

    /// A collaborator did not answer within its time budget.
    #[error("Timed out during {operation} after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    /// Malformed frame on an event stream.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// The event stream ended without a terminal event.
    #[error("Stream ended without a terminal event")]
    StreamTruncated,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl QaError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a rerank error.
    pub fn rerank(message: impl Into<String>) -> Self {
        Self::Rerank {
            message: message.into(),
        }
    }

    /// Create a generation error.
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, after: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after_ms: after.as_millis() as u64,
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the stable error code used in error events and HTTP bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::DocumentNotFound { .. } => "DOCUMENT_NOT_FOUND",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Rerank { .. } => "RERANK_ERROR",
            Self::Generation { .. } => "GENERATION_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::StreamTruncated => "STREAM_TRUNCATED",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Whether the error was caused by bad caller input.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. } | Self::DimensionMismatch { .. }
        )
    }

    /// Whether the error came from an external collaborator
    /// (store, models, generator service).
    pub fn is_collaborator_error(&self) -> bool {
        matches!(
            self,
            Self::Database { .. }
                | Self::Embedding { .. }
                | Self::Rerank { .. }
                | Self::Generation { .. }
                | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QaError::DocumentNotFound {
            id: "abc123".to_string(),
        };
        assert!(err.to_string().contains("abc123"));

        let err = QaError::DimensionMismatch {
            expected: 384,
            actual: 768,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 384, got 768");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            QaError::invalid_argument("k must be >= 1").error_code(),
            "INVALID_ARGUMENT"
        );
        assert_eq!(QaError::database("test").error_code(), "DATABASE_ERROR");
        assert_eq!(QaError::StreamTruncated.error_code(), "STREAM_TRUNCATED");
    }

    #[test]
    fn test_timeout_message() {
        let err = QaError::timeout("embedding", std::time::Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Timed out during embedding after 1500ms");
        assert!(err.is_collaborator_error());
    }

    #[test]
    fn test_error_classes() {
        assert!(QaError::invalid_argument("x").is_client_error());
        assert!(!QaError::generation("x").is_client_error());
        assert!(QaError::rerank("x").is_collaborator_error());
        assert!(!QaError::internal("x").is_collaborator_error());
    }
}
