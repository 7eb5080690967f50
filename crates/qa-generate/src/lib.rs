//! qa-generate - Streaming answer generators
//!
//! Every generator turns a prompt into a [`TokenStream`]:
//!
//! - [`LocalGenerator`] drives a blocking in-process model on the blocking
//!   thread pool and forwards its tokens over a channel. It wraps either the
//!   [`OnnxGenerator`] (greedy GPT-2 style decoding) or the
//!   [`ExtractiveGenerator`].
//! - [`RemoteGenerator`] streams from an Ollama or OpenAI-compatible
//!   completion service.
//! - [`ScriptedGenerator`] replays fixed tokens, for tests and demos.

mod extractive;
mod local;
mod onnx;
mod remote;
mod scripted;

use std::sync::Arc;

pub use extractive::ExtractiveGenerator;
pub use local::{BlockingGenerator, LocalGenerator};
pub use onnx::OnnxGenerator;
pub use remote::RemoteGenerator;
pub use scripted::ScriptedGenerator;

pub use qa_core::{Generator, TokenStream};

use qa_core::{GeneratorConfig, GeneratorMode, Result};

/// Build the generator selected by `config`.
pub fn generator_from_config(config: &GeneratorConfig) -> Result<Arc<dyn Generator>> {
    match config.mode {
        GeneratorMode::Local => Ok(Arc::new(LocalGenerator::new(OnnxGenerator::from_config(
            &config.local,
        )?))),
        GeneratorMode::Remote => Ok(Arc::new(RemoteGenerator::from_config(&config.remote)?)),
        GeneratorMode::Extractive => Ok(Arc::new(LocalGenerator::new(ExtractiveGenerator::new()))),
    }
}
