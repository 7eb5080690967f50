//! Cross-encoder reranker.
//!
//! Scores each (query, text) pair jointly with a sequence-classification
//! model such as ms-marco-MiniLM-L-6-v2. Scores are raw logits: only their
//! order matters.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use qa_core::{QaError, Reranker, RerankerConfig, Result};

use crate::model::{load_session, load_tokenizer, model_files, pad_batch};

/// ONNX cross-encoder reranker.
pub struct OnnxReranker {
    inner: Arc<Inner>,
}

struct Inner {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    batch_size: usize,
}

impl OnnxReranker {
    /// Load the model described by `config`.
    pub fn from_config(config: &RerankerConfig) -> Result<Self> {
        let (model_path, tokenizer_path) = model_files(&config.model_path);

        let session = load_session(&model_path, config.num_threads, QaError::rerank)?;
        let tokenizer = load_tokenizer(&tokenizer_path, config.max_tokens, QaError::rerank)?;

        info!(
            "Reranker initialized: max_tokens={}, batch_size={}",
            config.max_tokens, config.batch_size
        );

        Ok(Self {
            inner: Arc::new(Inner {
                session: Mutex::new(session),
                tokenizer,
                batch_size: config.batch_size.max(1),
            }),
        })
    }
}

impl Inner {
    fn score_all(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            scores.extend(self.score_batch(query, batch)?);
        }
        Ok(scores)
    }

    fn score_batch(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let pairs: Vec<(String, String)> = texts
            .iter()
            .map(|t| (query.to_string(), t.clone()))
            .collect();

        let encodings = self
            .tokenizer
            .encode_batch(pairs, true)
            .map_err(|e| QaError::rerank(format!("Tokenization failed: {}", e)))?;

        let batch_size = encodings.len();
        let (max_len, input_ids, attention_mask, token_type_ids) = pad_batch(&encodings);

        debug!("Rerank batch: size={}, max_len={}", batch_size, max_len);

        let shape = vec![batch_size, max_len];
        let input_ids = Tensor::from_array((shape.clone(), input_ids))
            .map_err(|e| QaError::rerank(format!("Failed to create input tensor: {}", e)))?;
        let attention_mask = Tensor::from_array((shape.clone(), attention_mask))
            .map_err(|e| QaError::rerank(format!("Failed to create mask tensor: {}", e)))?;
        let token_type_ids = Tensor::from_array((shape, token_type_ids))
            .map_err(|e| QaError::rerank(format!("Failed to create token type tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| QaError::rerank(format!("Failed to lock session: {}", e)))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids
            ])
            .map_err(|e| QaError::rerank(format!("Inference failed: {}", e)))?;

        let (_, logits) = outputs
            .iter()
            .next()
            .ok_or_else(|| QaError::rerank("No output tensor found"))?;

        let view = logits
            .try_extract_array::<f32>()
            .map_err(|e| QaError::rerank(format!("Failed to extract tensor: {}", e)))?;

        // [batch, 1] logits, or [batch] for exported squeezed heads
        match view.shape() {
            [b, 1] if *b == batch_size => Ok((0..batch_size).map(|i| view[[i, 0]]).collect()),
            [b] if *b == batch_size => Ok((0..batch_size).map(|i| view[[i]]).collect()),
            other => Err(QaError::rerank(format!(
                "Unexpected logits shape: {:?}",
                other
            ))),
        }
    }
}

#[async_trait]
impl Reranker for OnnxReranker {
    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let inner = Arc::clone(&self.inner);
        let query = query.to_string();
        let texts: Vec<String> = texts.iter().map(|t| t.to_string()).collect();

        tokio::task::spawn_blocking(move || inner.score_all(&query, &texts))
            .await
            .map_err(|e| QaError::rerank(format!("Rerank task failed: {}", e)))?
    }
}
