//! ONNX-based embedding model implementation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::ArrayViewD;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use qa_core::{Embedder, EmbeddingConfig, Pooling, QaError, Result};

use crate::model::{l2_normalize, load_session, load_tokenizer, model_files, pad_batch};

/// ONNX-based bi-encoder embedder (bge-micro or compatible BERT model).
///
/// Inference is blocking, so each call moves onto the blocking thread pool.
pub struct OnnxEmbedder {
    inner: Arc<Inner>,
}

struct Inner {
    /// ONNX inference session (wrapped in Mutex for interior mutability).
    session: Mutex<Session>,

    tokenizer: Tokenizer,

    dimension: usize,
    pooling: Pooling,
    normalize: bool,
    token_type_ids: bool,
    document_prefix: String,
    query_prefix: String,
}

impl OnnxEmbedder {
    /// Load the model described by `config`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let (model_path, tokenizer_path) = model_files(&config.model_path);

        let session = load_session(&model_path, config.num_threads, QaError::embedding)?;
        let tokenizer = load_tokenizer(&tokenizer_path, config.max_tokens, QaError::embedding)?;

        info!(
            "Embedder initialized: dim={}, max_tokens={}, pooling={:?}",
            config.dimension, config.max_tokens, config.pooling
        );

        Ok(Self {
            inner: Arc::new(Inner {
                session: Mutex::new(session),
                tokenizer,
                dimension: config.dimension,
                pooling: config.pooling,
                normalize: config.normalize,
                token_type_ids: config.token_type_ids,
                document_prefix: config.document_prefix.clone(),
                query_prefix: config.query_prefix.clone(),
            }),
        })
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.embed_batch(texts))
            .await
            .map_err(|e| QaError::embedding(format!("Embedding task failed: {}", e)))?
    }
}

impl Inner {
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts, true)
            .map_err(|e| QaError::embedding(format!("Tokenization failed: {}", e)))?;

        let batch_size = encodings.len();
        let (max_len, input_ids, attention_mask, token_type_ids) = pad_batch(&encodings);

        debug!("Embedding batch: size={}, max_len={}", batch_size, max_len);

        let input_ids_tensor = Tensor::from_array((vec![batch_size, max_len], input_ids))
            .map_err(|e| QaError::embedding(format!("Failed to create input tensor: {}", e)))?;

        let attention_mask_tensor =
            Tensor::from_array((vec![batch_size, max_len], attention_mask.clone()))
                .map_err(|e| QaError::embedding(format!("Failed to create mask tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| QaError::embedding(format!("Failed to lock session: {}", e)))?;

        let outputs = if self.token_type_ids {
            let token_type_tensor =
                Tensor::from_array((vec![batch_size, max_len], token_type_ids)).map_err(|e| {
                    QaError::embedding(format!("Failed to create token type tensor: {}", e))
                })?;
            session.run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_tensor
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor
            ])
        }
        .map_err(|e| QaError::embedding(format!("Inference failed: {}", e)))?;

        // First output: last_hidden_state or an already pooled embedding
        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| QaError::embedding("No output tensor found"))?;

        let view = output
            .try_extract_array::<f32>()
            .map_err(|e| QaError::embedding(format!("Failed to extract tensor: {}", e)))?;

        let shape: Vec<usize> = view.shape().to_vec();
        debug!("Output shape: {:?}", shape);

        let mut embeddings = match shape.len() {
            3 => self.pool(&view, &attention_mask, max_len),
            2 => (0..batch_size)
                .map(|i| (0..shape[1]).map(|j| view[[i, j]]).collect())
                .collect(),
            _ => {
                return Err(QaError::embedding(format!(
                    "Unexpected output shape: {:?}",
                    shape
                )))
            }
        };

        for embedding in &mut embeddings {
            if embedding.len() != self.dimension {
                return Err(QaError::embedding(format!(
                    "Model produced dimension {}, configured {}",
                    embedding.len(),
                    self.dimension
                )));
            }
            if self.normalize {
                l2_normalize(embedding);
            }
        }

        Ok(embeddings)
    }

    /// Pool `[batch, seq, hidden]` token states into one vector per input.
    fn pool(&self, tensor: &ArrayViewD<'_, f32>, mask: &[i64], max_len: usize) -> Vec<Vec<f32>> {
        let shape = tensor.shape();
        let (batch_size, seq_len, hidden_dim) = (shape[0], shape[1], shape[2]);

        (0..batch_size)
            .map(|i| match self.pooling {
                Pooling::Cls => (0..hidden_dim).map(|k| tensor[[i, 0, k]]).collect(),
                Pooling::Mean => {
                    let mut sum = vec![0.0f32; hidden_dim];
                    let mut count = 0usize;
                    for j in 0..seq_len.min(max_len) {
                        if mask[i * max_len + j] == 1 {
                            count += 1;
                            for (k, s) in sum.iter_mut().enumerate() {
                                *s += tensor[[i, j, k]];
                            }
                        }
                    }
                    if count > 0 {
                        for s in &mut sum {
                            *s /= count as f32;
                        }
                    }
                    sum
                }
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let prefixed = texts
            .iter()
            .map(|t| format!("{}{}", self.inner.document_prefix, t))
            .collect();
        self.embed(prefixed).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let prefixed = vec![format!("{}{}", self.inner.query_prefix, text)];
        self.embed(prefixed)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| QaError::embedding("No embedding returned"))
    }

    fn dimension(&self) -> usize {
        self.inner.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmbeddingConfig {
            model_path: dir.path().join("absent"),
            ..EmbeddingConfig::default()
        };

        let err = OnnxEmbedder::from_config(&config).err().unwrap();
        assert!(matches!(err, QaError::Embedding { .. }));
    }
}
