//! qa-server - HTTP surface for grounded question answering
//!
//! # Endpoints
//!
//! - `GET /api/query?query=&k=` - answer stream (server-sent events)
//! - `GET /api/search?query=&k=` - similarity search, no generation
//! - `POST /api/documents` - insert or replace a document
//! - `DELETE /api/documents/:id` - remove a document
//! - `GET /api/stats` - document count and embedding dimension
//! - `GET /health` - liveness
//! - anything else - browser client files, when `server.static_dir` is set

mod error;
mod routes;
mod server;
mod state;

pub use error::ApiError;
pub use routes::{InsertRequest, InsertResponse, QueryParams};
pub use server::{build_router, QaServer};
pub use state::AppState;
