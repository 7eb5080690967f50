//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use qa_core::{Embedder, Generator, QaConfig, Reranker, Result, VectorStore};
use qa_embed::{embedder_from_config, reranker_from_config};
use qa_generate::generator_from_config;
use qa_query::{Pipeline, SearchEngine};
use qa_store::SqliteStore;

/// State handed to every request handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pipeline: Arc<Pipeline>,
    engine: SearchEngine,
    keepalive: Duration,
}

impl AppState {
    /// Load the models and open the store described by `config`.
    pub fn from_config(config: &QaConfig) -> Result<Self> {
        let embedder = embedder_from_config(&config.embedding)?;
        let reranker = reranker_from_config(&config.reranker)?;
        let generator = generator_from_config(&config.generator)?;
        let store = Arc::new(SqliteStore::from_config(
            &config.database,
            embedder.dimension(),
        )?);

        info!(
            "Opened store at {:?} (dimension {})",
            store.path(),
            embedder.dimension()
        );

        Self::with_collaborators(store, embedder, reranker, generator, config)
    }

    /// Build the state from already constructed collaborators.
    pub fn with_collaborators(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
        generator: Arc<dyn Generator>,
        config: &QaConfig,
    ) -> Result<Self> {
        let engine = SearchEngine::new(Arc::clone(&store), Arc::clone(&embedder))?;
        let pipeline = Pipeline::new(store, embedder, reranker, generator, config.pipeline.clone())?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                pipeline: Arc::new(pipeline),
                engine,
                keepalive: Duration::from_secs(config.server.keepalive_secs.max(1)),
            }),
        })
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.inner.pipeline
    }

    pub fn engine(&self) -> &SearchEngine {
        &self.inner.engine
    }

    /// Interval between keep-alive comments on answer streams.
    pub fn keepalive(&self) -> Duration {
        self.inner.keepalive
    }
}
