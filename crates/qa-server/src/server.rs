//! HTTP server.

use std::net::SocketAddr;
use std::path::Path;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use qa_core::{QaConfig, QaError, Result};

use crate::routes::api_routes;
use crate::state::AppState;

/// Question answering HTTP server.
pub struct QaServer {
    config: QaConfig,
    state: AppState,
}

impl QaServer {
    /// Create a server, loading every collaborator from `config`.
    pub fn new(config: QaConfig) -> Result<Self> {
        info!("Initializing QA server");
        let state = AppState::from_config(&config)?;
        Ok(Self { config, state })
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Router {
        build_router(self.state.clone(), self.config.server.static_dir.as_deref())
    }

    /// Serve until interrupted.
    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = self.config.server.bind_address.parse().map_err(|e| {
            QaError::config(format!(
                "Invalid bind address {:?}: {}",
                self.config.server.bind_address, e
            ))
        })?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Listening on http://{}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server stopped");
        Ok(())
    }
}

/// Router over `state`. Paths outside the API fall back to files under
/// `static_dir` when one is given.
pub fn build_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes());

    if let Some(dir) = static_dir {
        info!("Serving static files from {}", dir.display());
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}
