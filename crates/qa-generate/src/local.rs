//! Adapter from blocking in-process models to async token streams.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use qa_core::{Generator, QaError, Result, TokenStream};

/// A model that produces tokens synchronously.
pub trait BlockingGenerator: Send + Sync + 'static {
    /// Generate a continuation of `prompt`, passing each token to `emit`.
    ///
    /// `emit` returns `false` once the consumer is gone; implementations
    /// must stop generating when that happens.
    fn generate_blocking(&self, prompt: &str, emit: &mut dyn FnMut(String) -> bool)
        -> Result<()>;
}

/// Runs a [`BlockingGenerator`] on the blocking thread pool.
///
/// Tokens are forwarded over an unbounded channel, so the model never waits
/// on a slow consumer. Once the channel closes the stream awaits the model
/// task, so a failure or panic after the last token still reaches the
/// consumer as an error item.
pub struct LocalGenerator<G> {
    model: Arc<G>,
}

impl<G: BlockingGenerator> LocalGenerator<G> {
    pub fn new(model: G) -> Self {
        Self {
            model: Arc::new(model),
        }
    }
}

#[async_trait]
impl<G: BlockingGenerator> Generator for LocalGenerator<G> {
    async fn generate(&self, prompt: &str) -> Result<TokenStream> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let model = Arc::clone(&self.model);
        let prompt = prompt.to_string();

        let task = tokio::task::spawn_blocking(move || {
            let mut emit = |token: String| tx.send(token).is_ok();
            model.generate_blocking(&prompt, &mut emit)
        });

        let stream = async_stream::stream! {
            while let Some(token) = rx.recv().await {
                yield Ok(token);
            }
            match task.await {
                Ok(Ok(())) => debug!("Local generation finished"),
                Ok(Err(e)) => yield Err(e),
                Err(e) => yield Err(QaError::generation(format!("Generator task failed: {}", e))),
            }
        };

        Ok(Box::pin(stream))
    }
}
