//! Generator replaying a fixed script.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use qa_core::{Generator, QaError, Result, TokenStream};

/// Streams preset tokens, optionally failing part way.
///
/// Every prompt it receives is recorded, so callers can check what the
/// generator was asked.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    tokens: Vec<String>,
    fail_after: Option<usize>,
    fail_on_start: Option<String>,
    token_delay: Duration,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Yield an error item after `n` tokens instead of finishing.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Refuse to start, as an unreachable service would.
    pub fn fail_on_start(mut self, message: impl Into<String>) -> Self {
        self.fail_on_start = Some(message.into());
        self
    }

    /// Sleep before each token.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<TokenStream> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        if let Some(message) = &self.fail_on_start {
            return Err(QaError::generation(message.clone()));
        }

        let tokens = self.tokens.clone();
        let fail_after = self.fail_after;
        let delay = self.token_delay;

        let stream = async_stream::stream! {
            for (i, token) in tokens.into_iter().enumerate() {
                if fail_after == Some(i) {
                    break;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(token);
            }
            if let Some(n) = fail_after {
                yield Err(QaError::generation(format!("scripted failure after {} tokens", n)));
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_replays_tokens_and_records_prompt() {
        let generator = ScriptedGenerator::new(["a", "b"]);
        let items: Vec<Result<String>> = generator.generate("the prompt").await.unwrap().collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(generator.prompts(), vec!["the prompt".to_string()]);
    }

    #[tokio::test]
    async fn test_fail_after() {
        let generator = ScriptedGenerator::new(["a", "b", "c"]).fail_after(2);
        let items: Vec<Result<String>> = generator.generate("p").await.unwrap().collect().await;

        assert_eq!(items.len(), 3);
        assert!(items[1].is_ok());
        assert!(items[2].is_err());
    }

    #[tokio::test]
    async fn test_fail_on_start() {
        let generator = ScriptedGenerator::new(["a"]).fail_on_start("connection refused");
        assert!(generator.generate("p").await.is_err());
    }
}
