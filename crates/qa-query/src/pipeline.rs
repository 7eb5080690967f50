//! Streaming question answering: embed, retrieve, rerank, fuse, prompt
//! and generate, reported as a stream of events.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, info_span, warn, Instrument};
use ulid::Ulid;

use qa_core::{
    Embedder, ErrorPayload, Generator, PipelineConfig, PipelineState, QaError, Query, Reranker,
    Result, RetrievalCandidate, StreamEvent, VectorStore,
};

use crate::engine::ensure_dimensions;
use crate::fusion::{fuse, initial_ranks, rerank, rerank_ranks};
use crate::prompt::build_prompt;

/// Status sent when retrieval finds nothing. The stream then completes.
pub const NO_RESULTS_MESSAGE: &str =
    "I couldn't find any relevant information to answer your question.";

/// Why an execution stopped before completing.
enum Halt {
    Failed(QaError),
    /// The consumer went away; nothing more can be delivered.
    Disconnected,
}

impl From<QaError> for Halt {
    fn from(e: QaError) -> Self {
        Halt::Failed(e)
    }
}

/// Sending half of one execution's event stream.
struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    async fn send(&self, event: StreamEvent) -> std::result::Result<(), Halt> {
        self.tx.send(event).await.map_err(|_| Halt::Disconnected)
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

/// The question answering pipeline.
///
/// Holds only shared, read-only collaborators; every execution keeps its
/// own state, so one instance serves any number of concurrent queries.
pub struct Pipeline {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
    generator: Arc<dyn Generator>,
    config: PipelineConfig,
    collaborator_timeout: Duration,
    request_timeout: Duration,
}

impl Pipeline {
    /// Create a pipeline. Fails on an invalid configuration or when the
    /// embedder and the store disagree on the embedding dimension.
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
        generator: Arc<dyn Generator>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        ensure_dimensions(store.as_ref(), embedder.as_ref())?;

        Ok(Self {
            store,
            embedder,
            reranker,
            generator,
            collaborator_timeout: config.collaborator_timeout(),
            request_timeout: config.request_timeout(),
            config,
        })
    }

    /// Override the time budgets with finer-grained durations.
    pub fn with_timeouts(mut self, collaborator: Duration, request: Duration) -> Self {
        self.collaborator_timeout = collaborator;
        self.request_timeout = request;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate caller input. `k` defaults to the configured default.
    pub fn query(&self, text: &str, k: Option<usize>) -> Result<Query> {
        let query = Query::new(text, Some(k.unwrap_or(self.config.default_k)))?;
        query.ensure_max_k(self.config.max_k)?;
        Ok(query)
    }

    /// Answer `query` on a background task, returning its event stream.
    ///
    /// The stream ends after exactly one terminal event. Dropping it stops
    /// the execution and releases the generator.
    pub fn answer(self: &Arc<Self>, query: Query) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.run(query, tx).await });
        ReceiverStream::new(rx)
    }

    /// Execute `query`, sending its events to `tx`.
    pub async fn run(&self, query: Query, tx: mpsc::Sender<StreamEvent>) {
        let request_id = Ulid::new();
        let span = info_span!("query", %request_id, k = query.k);

        async move {
            let started = Instant::now();
            let sink = EventSink { tx };
            let mut state = PipelineState::Start;

            info!("Answering: {:?}", query.text);

            let outcome = tokio::select! {
                result = timeout(self.request_timeout, self.execute(&query, &sink, &mut state)) => {
                    match result {
                        Ok(outcome) => outcome,
                        Err(_) => Err(Halt::Failed(QaError::timeout("request", self.request_timeout))),
                    }
                }
                _ = sink.closed() => Err(Halt::Disconnected),
            };

            match outcome {
                Ok(()) => {
                    // An empty retrieval completes from the retrieval stage.
                    state = PipelineState::Done;
                    if sink.send(StreamEvent::Done).await.is_err() {
                        warn!("Client disconnected before completion was delivered");
                        return;
                    }
                    info!(
                        "Query {} in {}ms",
                        state,
                        started.elapsed().as_millis()
                    );
                }
                Err(Halt::Failed(e)) => {
                    let stage = state;
                    state = PipelineState::Failed;
                    error!(%stage, code = e.error_code(), "Query {}: {}", state, e);
                    let payload = ErrorPayload::from_error(&e, stage);
                    if sink.send(StreamEvent::Error(payload)).await.is_err() {
                        warn!("Client disconnected before the error was delivered");
                    }
                }
                Err(Halt::Disconnected) => {
                    warn!(stage = %state, "Client disconnected, stopping");
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        query: &Query,
        sink: &EventSink,
        state: &mut PipelineState,
    ) -> std::result::Result<(), Halt> {
        *state = state.next();
        self.progress(sink, "Searching documents").await?;
        let embedding = self
            .bounded(*state, self.embedder.embed_query(&query.text))
            .await?;

        *state = state.next();
        let hits = self
            .bounded(
                *state,
                self.store.top_k(&embedding, self.config.initial_candidates),
            )
            .await?;

        if hits.is_empty() {
            info!("No documents retrieved");
            sink.send(StreamEvent::Status(NO_RESULTS_MESSAGE.to_string()))
                .await?;
            return Ok(());
        }

        let candidates: Vec<RetrievalCandidate> = hits
            .into_iter()
            .enumerate()
            .map(|(i, hit)| RetrievalCandidate {
                document: hit.document,
                rank: i + 1,
                similarity: hit.similarity,
            })
            .collect();
        debug!("Retrieved {} candidates", candidates.len());

        *state = state.next();
        self.progress(sink, format!("Reranking {} candidates", candidates.len()))
            .await?;
        let texts: Vec<&str> = candidates
            .iter()
            .map(|c| c.document.text.as_str())
            .collect();
        let scores = self
            .bounded(*state, self.reranker.score(&query.text, &texts))
            .await?;
        let reranked = rerank(&candidates, &scores)?;
        debug!(
            top = reranked.first().map(|c| c.document.id.as_str()),
            "Reranked {} candidates",
            reranked.len()
        );

        *state = state.next();
        let fused = fuse(
            &candidates,
            &initial_ranks(&candidates),
            &rerank_ranks(&reranked),
            self.config.fusion_constant,
            query.k,
        )?;
        for result in &fused {
            debug!(
                id = %result.document.id,
                score = result.score,
                initial_rank = result.initial_rank,
                rerank_rank = result.rerank_rank,
                "Fused"
            );
        }

        *state = state.next();
        let prompt = build_prompt(&query.text, &fused);

        *state = state.next();
        self.progress(
            sink,
            format!("Generating answer from {} documents", fused.len()),
        )
        .await?;
        let mut tokens = self.bounded(*state, self.generator.generate(&prompt)).await?;

        let mut relayed = 0usize;
        while let Some(item) = tokens.next().await {
            let token = item?;
            if token.is_empty() {
                continue;
            }
            sink.send(StreamEvent::Token(token)).await?;
            relayed += 1;
        }
        debug!("Relayed {} tokens", relayed);

        Ok(())
    }

    async fn progress(
        &self,
        sink: &EventSink,
        message: impl Into<String>,
    ) -> std::result::Result<(), Halt> {
        if !self.config.progress_events {
            return Ok(());
        }
        sink.send(StreamEvent::Status(message.into())).await
    }

    /// Run one collaborator call under the collaborator budget.
    async fn bounded<T, F>(&self, stage: PipelineState, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match timeout(self.collaborator_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(QaError::timeout(stage.as_str(), self.collaborator_timeout)),
        }
    }
}
