//! Loading helpers shared by the ONNX models.

use std::path::{Path, PathBuf};

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

/// Model weights file inside a model directory.
pub const MODEL_FILE: &str = "model.onnx";

/// Tokenizer file inside a model directory.
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Resolve the model and tokenizer files of a model directory.
///
/// A path ending in `.onnx` is taken as the model file itself, with the
/// tokenizer expected next to it.
pub fn model_files(path: &Path) -> (PathBuf, PathBuf) {
    if path.extension().is_some_and(|ext| ext == "onnx") {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        (path.to_path_buf(), dir.join(TOKENIZER_FILE))
    } else {
        (path.join(MODEL_FILE), path.join(TOKENIZER_FILE))
    }
}

/// Build an ONNX Runtime session. `err` wraps failures in the caller's
/// error kind.
pub fn load_session<E>(model_path: &Path, num_threads: usize, err: E) -> qa_core::Result<Session>
where
    E: Fn(String) -> qa_core::QaError,
{
    info!("Loading ONNX model from {:?}", model_path);

    Session::builder()
        .map_err(|e| err(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| err(format!("Failed to set optimization level: {}", e)))?
        .with_intra_threads(num_threads.max(1))
        .map_err(|e| err(format!("Failed to set thread count: {}", e)))?
        .commit_from_file(model_path)
        .map_err(|e| err(format!("Failed to load model: {}", e)))
}

/// Load a tokenizer that truncates to `max_tokens`.
pub fn load_tokenizer<E>(tokenizer_path: &Path, max_tokens: usize, err: E) -> qa_core::Result<Tokenizer>
where
    E: Fn(String) -> qa_core::QaError,
{
    info!("Loading tokenizer from {:?}", tokenizer_path);

    let mut tokenizer = Tokenizer::from_file(tokenizer_path)
        .map_err(|e| err(format!("Failed to load tokenizer: {}", e)))?;

    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: max_tokens,
            ..Default::default()
        }))
        .map_err(|e| err(format!("Failed to configure truncation: {}", e)))?;

    Ok(tokenizer)
}

/// Pack encodings into zero-padded `[batch, max_len]` id, mask and type
/// buffers.
pub fn pad_batch(encodings: &[tokenizers::Encoding]) -> (usize, Vec<i64>, Vec<i64>, Vec<i64>) {
    let max_len = encodings
        .iter()
        .map(|e| e.get_ids().len())
        .max()
        .unwrap_or(0);

    let batch_size = encodings.len();
    let mut input_ids = vec![0i64; batch_size * max_len];
    let mut attention_mask = vec![0i64; batch_size * max_len];
    let mut token_type_ids = vec![0i64; batch_size * max_len];

    for (i, encoding) in encodings.iter().enumerate() {
        let ids = encoding.get_ids();
        let mask = encoding.get_attention_mask();
        let types = encoding.get_type_ids();

        for j in 0..ids.len() {
            input_ids[i * max_len + j] = ids[j] as i64;
            attention_mask[i * max_len + j] = mask[j] as i64;
            token_type_ids[i * max_len + j] = types.get(j).copied().unwrap_or(0) as i64;
        }
    }

    (max_len, input_ids, attention_mask, token_type_ids)
}

/// L2 normalize a vector in place.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_files_from_directory() {
        let (model, tokenizer) = model_files(Path::new("/models/bge-micro"));
        assert_eq!(model, PathBuf::from("/models/bge-micro/model.onnx"));
        assert_eq!(tokenizer, PathBuf::from("/models/bge-micro/tokenizer.json"));
    }

    #[test]
    fn test_model_files_from_onnx_path() {
        let (model, tokenizer) = model_files(Path::new("/models/gpt2/decoder.onnx"));
        assert_eq!(model, PathBuf::from("/models/gpt2/decoder.onnx"));
        assert_eq!(tokenizer, PathBuf::from("/models/gpt2/tokenizer.json"));
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_missing_model_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let (model, _) = model_files(dir.path());
        let err = load_session(&model, 1, qa_core::QaError::embedding).unwrap_err();
        assert_eq!(err.error_code(), "EMBEDDING_ERROR");
    }
}
