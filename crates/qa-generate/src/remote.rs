//! Streaming client for a remote completion service.
//!
//! Two wire formats are spoken:
//!
//! - Ollama `POST /api/generate`: newline-delimited JSON objects carrying
//!   `response` text, ended by one with `"done": true`.
//! - OpenAI-compatible `POST /v1/completions`: server-sent events whose
//!   `data:` lines carry `choices[0].text`, ended by `data: [DONE]`.
//!
//! A response that ends before its completion marker is reported as a
//! generation error, never as a finished answer.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use qa_core::{
    Generator, LineBuffer, QaError, RemoteFormat, RemoteGeneratorConfig, Result, TokenStream,
};

/// Remote completion service client.
pub struct RemoteGenerator {
    /// HTTP client
    client: Client,
    config: RemoteGeneratorConfig,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    error: Option<CompletionError>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct CompletionError {
    message: String,
}

/// What one line of the response contributed.
#[derive(Debug, PartialEq)]
struct Parsed {
    token: Option<String>,
    done: bool,
}

impl Parsed {
    fn skip() -> Self {
        Self {
            token: None,
            done: false,
        }
    }
}

impl RemoteGenerator {
    pub fn from_config(config: &RemoteGeneratorConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| QaError::generation(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            "Remote generator: {:?} at {} (model {})",
            config.format, config.base_url, config.model
        );

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn request(&self, prompt: &str) -> reqwest::RequestBuilder {
        let base = self.config.base_url.trim_end_matches('/');
        let builder = match self.config.format {
            RemoteFormat::Ollama => self
                .client
                .post(format!("{}/api/generate", base))
                .json(&OllamaRequest {
                    model: &self.config.model,
                    prompt,
                    stream: true,
                    options: OllamaOptions {
                        temperature: self.config.temperature,
                        num_predict: self.config.max_tokens,
                    },
                }),
            RemoteFormat::Openai => self
                .client
                .post(format!("{}/v1/completions", base))
                .json(&CompletionRequest {
                    model: &self.config.model,
                    prompt,
                    stream: true,
                    max_tokens: self.config.max_tokens,
                    temperature: self.config.temperature,
                }),
        };

        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

fn parse_line(format: RemoteFormat, line: &str) -> Result<Parsed> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Parsed::skip());
    }

    match format {
        RemoteFormat::Ollama => {
            let chunk: OllamaChunk = serde_json::from_str(line)
                .map_err(|e| QaError::generation(format!("Malformed stream chunk: {}", e)))?;
            if let Some(error) = chunk.error {
                return Err(QaError::generation(error));
            }
            Ok(Parsed {
                token: (!chunk.response.is_empty()).then_some(chunk.response),
                done: chunk.done,
            })
        }
        RemoteFormat::Openai => {
            // Only data lines matter; event names, ids and comments do not.
            let Some(data) = line.strip_prefix("data:") else {
                return Ok(Parsed::skip());
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                return Ok(Parsed {
                    token: None,
                    done: true,
                });
            }
            let chunk: CompletionChunk = serde_json::from_str(data)
                .map_err(|e| QaError::generation(format!("Malformed stream chunk: {}", e)))?;
            if let Some(error) = chunk.error {
                return Err(QaError::generation(error.message));
            }
            let token = chunk
                .choices
                .into_iter()
                .next()
                .map(|c| c.text)
                .filter(|t| !t.is_empty());
            Ok(Parsed { token, done: false })
        }
    }
}

#[async_trait]
impl Generator for RemoteGenerator {
    async fn generate(&self, prompt: &str) -> Result<TokenStream> {
        let response = self
            .request(prompt)
            .send()
            .await
            .map_err(|e| QaError::generation(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QaError::generation(format!(
                "Service returned HTTP {}: {}",
                status,
                body.trim()
            )));
        }

        let format = self.config.format;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut lines = LineBuffer::new();
            let mut done = false;

            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| QaError::generation(format!("Stream error: {}", e)))?;
                for line in lines.push(&chunk)? {
                    let parsed = parse_line(format, &line)?;
                    if let Some(token) = parsed.token {
                        yield token;
                    }
                    if parsed.done {
                        done = true;
                        break 'read;
                    }
                }
            }

            // A final line may arrive without its newline.
            if !done {
                if let Some(line) = lines.finish()? {
                    let parsed = parse_line(format, &line)?;
                    if let Some(token) = parsed.token {
                        yield token;
                    }
                    done = parsed.done;
                }
            }

            if !done {
                Err::<(), _>(QaError::generation("Stream ended before generation completed"))?;
            }
            debug!("Remote generation finished");
        };

        Ok(Box::pin(stream))
    }
}
