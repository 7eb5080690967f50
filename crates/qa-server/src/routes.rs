//! Request handlers.

use std::convert::Infallible;

use axum::extract::{self, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::info;

use qa_core::protocol::encode_event;
use qa_core::{InsertOutcome, StoreStats, StreamEvent};
use qa_query::SearchResults;

use crate::error::ApiError;
use crate::state::AppState;

/// `?query=<text>&k=<n>`
#[derive(Debug, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub query: String,

    pub k: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct InsertRequest {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct InsertResponse {
    pub id: String,
    pub outcome: InsertOutcome,
}

/// Routes under `/api`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/query", get(answer))
        .route("/search", get(search))
        .route("/documents", post(insert_document))
        .route("/documents/:id", delete(delete_document))
        .route("/stats", get(stats))
}

/// GET /api/query - stream a grounded answer.
///
/// Invalid input is rejected with a JSON 400 before any stage runs.
async fn answer(
    State(state): State<AppState>,
    extract::Query(params): extract::Query<QueryParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let query = state.pipeline().query(&params.query, params.k)?;

    let events = state
        .pipeline()
        .answer(query)
        .map(|event| Ok(to_sse(&event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(state.keepalive())))
}

fn to_sse(event: &StreamEvent) -> Event {
    let frame = encode_event(event);
    let mut sse = Event::default();
    if let Some(name) = frame.event {
        sse = sse.event(name);
    }
    sse.data(frame.data)
}

/// GET /api/search - similarity search without generation.
async fn search(
    State(state): State<AppState>,
    extract::Query(params): extract::Query<QueryParams>,
) -> Result<Json<SearchResults>, ApiError> {
    let query = state.pipeline().query(&params.query, params.k)?;
    Ok(Json(state.engine().search(&query).await?))
}

/// POST /api/documents - insert or replace a document.
async fn insert_document(
    State(state): State<AppState>,
    Json(request): Json<InsertRequest>,
) -> Result<(StatusCode, Json<InsertResponse>), ApiError> {
    let outcome = state.engine().insert(&request.id, &request.text).await?;
    info!("Document {} {:?}", request.id, outcome);

    let status = match outcome {
        InsertOutcome::Inserted => StatusCode::CREATED,
        InsertOutcome::Updated | InsertOutcome::Unchanged => StatusCode::OK,
    };

    Ok((
        status,
        Json(InsertResponse {
            id: request.id,
            outcome,
        }),
    ))
}

/// DELETE /api/documents/:id
async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/stats
async fn stats(State(state): State<AppState>) -> Result<Json<StoreStats>, ApiError> {
    Ok(Json(state.engine().stats().await?))
}
