//! Configuration types for the QA system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{QaError, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "QA_CONFIG";

/// Environment variable overriding the database path.
pub const DATABASE_PATH_ENV: &str = "QA_DATABASE_PATH";

/// Main configuration for the QA system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QaConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedding model configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Reranker model configuration.
    #[serde(default)]
    pub reranker: RerankerConfig,

    /// Generator configuration.
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Pipeline tuning.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// SQLite cache size in KB (negative = KB, positive = pages).
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,

    /// Idle connections kept open for reuse.
    #[serde(default = "default_max_idle")]
    pub max_idle_connections: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            cache_size: default_cache_size(),
            busy_timeout_ms: default_busy_timeout(),
            max_idle_connections: default_max_idle(),
        }
    }
}

/// Which implementation backs a model collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    /// ONNX Runtime model loaded from disk.
    Onnx,
    /// Deterministic lexical stand-in, no model files needed.
    Mock,
}

/// Pooling strategy for token embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    Mean,
    Cls,
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_onnx_backend")]
    pub backend: ModelBackend,

    /// Directory holding `model.onnx` and `tokenizer.json`.
    #[serde(default = "default_embedding_model_path")]
    pub model_path: PathBuf,

    /// Embedding dimension (384 for bge-micro).
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Maximum tokens per input.
    #[serde(default = "default_embedding_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_pooling")]
    pub pooling: Pooling,

    /// L2-normalize output vectors.
    #[serde(default = "default_true")]
    pub normalize: bool,

    /// Feed `token_type_ids` (BERT-family models need it).
    #[serde(default = "default_true")]
    pub token_type_ids: bool,

    /// Prepended to document texts (asymmetric retrieval models).
    #[serde(default)]
    pub document_prefix: String,

    /// Prepended to query texts.
    #[serde(default)]
    pub query_prefix: String,

    /// Number of threads for CPU inference.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: ModelBackend::Onnx,
            model_path: default_embedding_model_path(),
            dimension: default_dimension(),
            max_tokens: default_embedding_max_tokens(),
            pooling: Pooling::Mean,
            normalize: true,
            token_type_ids: true,
            document_prefix: String::new(),
            query_prefix: String::new(),
            num_threads: default_num_threads(),
        }
    }
}

/// Reranker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    #[serde(default = "default_onnx_backend")]
    pub backend: ModelBackend,

    /// Directory holding `model.onnx` and `tokenizer.json`.
    #[serde(default = "default_reranker_model_path")]
    pub model_path: PathBuf,

    /// Maximum tokens per (query, text) pair.
    #[serde(default = "default_embedding_max_tokens")]
    pub max_tokens: usize,

    /// Pairs scored per inference call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            backend: ModelBackend::Onnx,
            model_path: default_reranker_model_path(),
            max_tokens: default_embedding_max_tokens(),
            batch_size: default_batch_size(),
            num_threads: default_num_threads(),
        }
    }
}

/// Where generation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorMode {
    /// In-process ONNX causal language model.
    Local,
    /// Remote streaming completion service.
    Remote,
    /// In-process extractive answerer, no model needed.
    Extractive,
}

/// Wire format spoken by the remote generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteFormat {
    /// Ollama `/api/generate`, newline-delimited JSON.
    Ollama,
    /// OpenAI-compatible `/v1/completions`, server-sent events.
    Openai,
}

/// Generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_mode")]
    pub mode: GeneratorMode,

    #[serde(default)]
    pub local: LocalGeneratorConfig,

    #[serde(default)]
    pub remote: RemoteGeneratorConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            mode: default_generator_mode(),
            local: LocalGeneratorConfig::default(),
            remote: RemoteGeneratorConfig::default(),
        }
    }
}

/// Local generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalGeneratorConfig {
    /// Directory holding `model.onnx` and `tokenizer.json`.
    #[serde(default = "default_generator_model_path")]
    pub model_path: PathBuf,

    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,

    /// Model context window in tokens.
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

impl Default for LocalGeneratorConfig {
    fn default() -> Self {
        Self {
            model_path: default_generator_model_path(),
            max_new_tokens: default_max_new_tokens(),
            context_window: default_context_window(),
            num_threads: default_num_threads(),
        }
    }
}

/// Remote generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteGeneratorConfig {
    #[serde(default = "default_remote_url")]
    pub base_url: String,

    #[serde(default = "default_remote_model")]
    pub model: String,

    #[serde(default = "default_remote_format")]
    pub format: RemoteFormat,

    /// Bearer token, if the service needs one.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_max_new_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for RemoteGeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_url(),
            model: default_remote_model(),
            format: default_remote_format(),
            api_key: None,
            max_tokens: default_max_new_tokens(),
            temperature: default_temperature(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Candidates fetched from the store before reranking.
    #[serde(default = "default_initial_candidates")]
    pub initial_candidates: usize,

    /// RRF constant.
    #[serde(default = "default_fusion_constant")]
    pub fusion_constant: f64,

    /// Default number of grounding documents.
    #[serde(default = "default_k")]
    pub default_k: usize,

    /// Maximum number of grounding documents a caller may ask for. Must be
    /// below `initial_candidates`.
    #[serde(default = "default_max_k")]
    pub max_k: usize,

    /// Budget for each embedding, retrieval and rerank call.
    #[serde(default = "default_collaborator_timeout")]
    pub collaborator_timeout_secs: u64,

    /// Budget for a whole query, generation included.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Events buffered between the pipeline and the transport.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Emit progress status events before each stage.
    #[serde(default = "default_true")]
    pub progress_events: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            initial_candidates: default_initial_candidates(),
            fusion_constant: default_fusion_constant(),
            default_k: default_k(),
            max_k: default_max_k(),
            collaborator_timeout_secs: default_collaborator_timeout(),
            request_timeout_secs: default_request_timeout(),
            event_buffer: default_event_buffer(),
            progress_events: true,
        }
    }
}

impl PipelineConfig {
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.initial_candidates == 0 {
            return Err(QaError::config("pipeline.initial_candidates must be at least 1"));
        }
        if self.max_k >= self.initial_candidates {
            return Err(QaError::config(format!(
                "pipeline.max_k ({}) must be below initial_candidates ({})",
                self.max_k, self.initial_candidates
            )));
        }
        if !(self.fusion_constant.is_finite() && self.fusion_constant >= 0.0) {
            return Err(QaError::config("pipeline.fusion_constant must be a non-negative number"));
        }
        if self.default_k == 0 || self.default_k > self.max_k {
            return Err(QaError::config("pipeline.default_k must be between 1 and max_k"));
        }
        if self.event_buffer == 0 {
            return Err(QaError::config("pipeline.event_buffer must be at least 1"));
        }
        if self.collaborator_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(QaError::config("pipeline timeouts must be non-zero"));
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Interval between SSE keep-alive comments.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    /// Directory of browser client files served under `/`.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            keepalive_secs: default_keepalive(),
            static_dir: None,
        }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_cache_size() -> i32 {
    -64000
}

fn default_busy_timeout() -> u32 {
    30000
}

fn default_max_idle() -> usize {
    4
}

fn default_onnx_backend() -> ModelBackend {
    ModelBackend::Onnx
}

fn default_pooling() -> Pooling {
    Pooling::Mean
}

fn default_dimension() -> usize {
    384
}

fn default_embedding_max_tokens() -> usize {
    512
}

fn default_batch_size() -> usize {
    32
}

fn default_num_threads() -> usize {
    4
}

fn default_generator_mode() -> GeneratorMode {
    GeneratorMode::Remote
}

fn default_max_new_tokens() -> usize {
    150
}

fn default_context_window() -> usize {
    1024
}

fn default_remote_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_remote_model() -> String {
    "llama3.2:3b".to_string()
}

fn default_remote_format() -> RemoteFormat {
    RemoteFormat::Ollama
}

fn default_temperature() -> f32 {
    0.2
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_initial_candidates() -> usize {
    25
}

fn default_fusion_constant() -> f64 {
    60.0
}

fn default_k() -> usize {
    crate::types::DEFAULT_K
}

fn default_max_k() -> usize {
    default_initial_candidates() - 1
}

fn default_collaborator_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    300
}

fn default_event_buffer() -> usize {
    64
}

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_keepalive() -> u64 {
    15
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("qa-rag")
}

fn default_database_path() -> PathBuf {
    data_dir().join("documents.db")
}

fn default_embedding_model_path() -> PathBuf {
    data_dir().join("models").join("bge-micro")
}

fn default_reranker_model_path() -> PathBuf {
    data_dir().join("models").join("ms-marco-MiniLM-L-6-v2")
}

fn default_generator_model_path() -> PathBuf {
    data_dir().join("models").join("gpt2")
}

impl QaConfig {
    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| QaError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default paths, then apply environment
    /// overrides.
    pub fn load_default() -> Result<Self> {
        let mut config = Self::discover()?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn discover() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }

        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("qa-rag").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("qa-rag.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(DATABASE_PATH_ENV) {
            if !path.is_empty() {
                self.database.path = PathBuf::from(path);
            }
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        if self.embedding.dimension == 0 {
            return Err(QaError::config("embedding.dimension must be non-zero"));
        }
        if self.reranker.batch_size == 0 {
            return Err(QaError::config("reranker.batch_size must be non-zero"));
        }
        Ok(())
    }
}
