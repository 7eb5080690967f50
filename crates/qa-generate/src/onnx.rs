//! Greedy decoding with an ONNX causal language model (GPT-2 family).

use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use qa_core::{LocalGeneratorConfig, QaError, Result};
use qa_embed::model::{load_session, model_files};

use crate::local::BlockingGenerator;

/// End-of-text marker of GPT-2 vocabularies.
const EOS_TOKEN: &str = "<|endoftext|>";

/// In-process causal LM decoder.
///
/// Each step reruns the model over the whole sequence and appends the
/// highest-scoring next token. Text is emitted as the decoded suffix grows,
/// holding back pieces that end inside a multi-byte character.
pub struct OnnxGenerator {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    eos_id: Option<u32>,
    max_new_tokens: usize,
    context_window: usize,
}

impl OnnxGenerator {
    /// Load the model described by `config`.
    pub fn from_config(config: &LocalGeneratorConfig) -> Result<Self> {
        if config.max_new_tokens >= config.context_window {
            return Err(QaError::config(
                "generator.local.max_new_tokens must be smaller than context_window",
            ));
        }

        let (model_path, tokenizer_path) = model_files(&config.model_path);
        let session = load_session(&model_path, config.num_threads, QaError::generation)?;

        // Prompts are cut from the left in `prompt_ids`, not by the tokenizer.
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| QaError::generation(format!("Failed to load tokenizer: {}", e)))?;
        let eos_id = tokenizer.token_to_id(EOS_TOKEN);

        info!(
            "Generator initialized: max_new_tokens={}, context_window={}",
            config.max_new_tokens, config.context_window
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            eos_id,
            max_new_tokens: config.max_new_tokens,
            context_window: config.context_window,
        })
    }

    /// Tokenize the prompt, keeping its tail when it would not leave room
    /// for `max_new_tokens`.
    fn prompt_ids(&self, prompt: &str) -> Result<Vec<i64>> {
        let encoding = self
            .tokenizer
            .encode(prompt, false)
            .map_err(|e| QaError::generation(format!("Tokenization failed: {}", e)))?;

        let ids = encoding.get_ids();
        let budget = self.context_window - self.max_new_tokens;
        let start = ids.len().saturating_sub(budget);
        if start > 0 {
            debug!("Prompt truncated from {} to {} tokens", ids.len(), budget);
        }
        Ok(ids[start..].iter().map(|&id| id as i64).collect())
    }

    /// Run the model once and return the argmax token after `ids`.
    fn next_token(&self, session: &mut Session, ids: &[i64]) -> Result<u32> {
        let len = ids.len();
        let input_ids = Tensor::from_array((vec![1, len], ids.to_vec()))
            .map_err(|e| QaError::generation(format!("Failed to create input tensor: {}", e)))?;
        let attention_mask = Tensor::from_array((vec![1, len], vec![1i64; len]))
            .map_err(|e| QaError::generation(format!("Failed to create mask tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask
            ])
            .map_err(|e| QaError::generation(format!("Inference failed: {}", e)))?;

        let (_, logits) = outputs
            .iter()
            .next()
            .ok_or_else(|| QaError::generation("No output tensor found"))?;

        let view = logits
            .try_extract_array::<f32>()
            .map_err(|e| QaError::generation(format!("Failed to extract tensor: {}", e)))?;

        // [batch, seq, vocab]; score the last position
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] != len {
            return Err(QaError::generation(format!(
                "Unexpected logits shape: {:?}",
                shape
            )));
        }

        let mut best = (0usize, f32::NEG_INFINITY);
        for v in 0..shape[2] {
            let score = view[[0, len - 1, v]];
            if score > best.1 {
                best = (v, score);
            }
        }
        Ok(best.0 as u32)
    }
}

impl BlockingGenerator for OnnxGenerator {
    fn generate_blocking(
        &self,
        prompt: &str,
        emit: &mut dyn FnMut(String) -> bool,
    ) -> Result<()> {
        let mut ids = self.prompt_ids(prompt)?;
        if ids.is_empty() {
            return Err(QaError::generation("Prompt produced no tokens"));
        }

        let mut session = self
            .session
            .lock()
            .map_err(|e| QaError::generation(format!("Failed to lock session: {}", e)))?;

        let mut generated: Vec<u32> = Vec::with_capacity(self.max_new_tokens);
        let mut delta = TextDelta::default();

        for _ in 0..self.max_new_tokens {
            let token = self.next_token(&mut session, &ids)?;
            if Some(token) == self.eos_id {
                break;
            }
            generated.push(token);
            ids.push(token as i64);

            if let Some(piece) = delta.next(self.decode(&generated)?) {
                if !emit(piece) {
                    debug!("Consumer left after {} tokens", generated.len());
                    return Ok(());
                }
            }
        }

        // A character still split when generation stopped goes out as is.
        if let Some(piece) = delta.flush(self.decode(&generated)?) {
            if !emit(piece) {
                debug!("Consumer left before the final piece");
            }
        }

        debug!("Generated {} tokens", generated.len());
        Ok(())
    }
}

impl OnnxGenerator {
    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| QaError::generation(format!("Decoding failed: {}", e)))
    }
}

/// Turns successive decodes of the growing output into the text not yet
/// emitted.
#[derive(Debug, Default)]
struct TextDelta {
    emitted: String,
}

impl TextDelta {
    /// New text since the last piece, held back while the decode ends in
    /// half of a multi-byte character.
    fn next(&mut self, text: String) -> Option<String> {
        if text.ends_with('\u{FFFD}') {
            return None;
        }
        self.take(text)
    }

    /// Whatever is left, partial characters included.
    fn flush(&mut self, text: String) -> Option<String> {
        self.take(text)
    }

    fn take(&mut self, text: String) -> Option<String> {
        let piece = match text.strip_prefix(self.emitted.as_str()) {
            Some(piece) => piece.to_string(),
            None => {
                // Sent text cannot be retracted; continue from the new decode.
                warn!(
                    emitted = self.emitted.len(),
                    decoded = text.len(),
                    "Decoder rewrote emitted text, resyncing"
                );
                text.get(self.emitted.len()..).unwrap_or_default().to_string()
            }
        };
        self.emitted = text;
        (!piece.is_empty()).then_some(piece)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_window_smaller_than_output() {
        let config = LocalGeneratorConfig {
            max_new_tokens: 2048,
            context_window: 1024,
            ..LocalGeneratorConfig::default()
        };
        let err = OnnxGenerator::from_config(&config).err().unwrap();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_delta_holds_split_character_until_complete() {
        let mut delta = TextDelta::default();
        assert_eq!(delta.next("Caf".into()).as_deref(), Some("Caf"));
        assert_eq!(delta.next("Caf\u{FFFD}".into()), None);
        assert_eq!(delta.next("Café".into()).as_deref(), Some("é"));
        assert_eq!(delta.flush("Café".into()), None);
    }

    #[test]
    fn test_delta_flushes_trailing_partial_character() {
        let mut delta = TextDelta::default();
        assert_eq!(delta.next("Paris".into()).as_deref(), Some("Paris"));
        assert_eq!(delta.next("Paris \u{FFFD}".into()), None);
        assert_eq!(
            delta.flush("Paris \u{FFFD}".into()).as_deref(),
            Some(" \u{FFFD}")
        );
    }

    #[test]
    fn test_delta_resyncs_after_rewrite() {
        let mut delta = TextDelta::default();
        assert_eq!(delta.next("Hello wor".into()).as_deref(), Some("Hello wor"));
        // earlier text changed, yet later output keeps flowing
        assert_eq!(delta.next("Hello, world".into()).as_deref(), Some("rld"));
        assert_eq!(delta.next("Hello, world!".into()).as_deref(), Some("!"));
    }

    #[test]
    fn test_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let config = LocalGeneratorConfig {
            model_path: dir.path().to_path_buf(),
            ..LocalGeneratorConfig::default()
        };
        let err = OnnxGenerator::from_config(&config).err().unwrap();
        assert_eq!(err.error_code(), "GENERATION_ERROR");
    }
}
