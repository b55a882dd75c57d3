//! HTTP API server for the Remo gateway

pub mod chat;
mod error;
pub mod health;
pub mod personas;
pub mod tts;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

use crate::Result;
use crate::chat::ChatGateway;
use crate::persona::PersonaCatalog;
use crate::speech::SpeechService;
use crate::voice::Transcriber;

/// Shared state for API handlers
///
/// Built once by the composition root and handed to every router.
#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<ChatGateway>,
    pub catalog: Arc<PersonaCatalog>,
    pub speech: Arc<SpeechService>,
    pub transcriber: Arc<Transcriber>,
}

/// Build the router with all routes
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(chat::router(state.clone()))
        .merge(personas::router(state.clone()))
        .nest("/tts", tts::router(state))
        .merge(health::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Run a catalog mutation on the blocking pool, since it writes the store to disk
pub(crate) async fn mutate_catalog<T, F>(catalog: &Arc<PersonaCatalog>, mutation: F) -> std::result::Result<T, ApiError>
where
    F: FnOnce(&PersonaCatalog) -> T + Send + 'static,
    T: Send + 'static,
{
    let catalog = catalog.clone();
    tokio::task::spawn_blocking(move || mutation(&catalog))
        .await
        .map_err(|e| ApiError::Service(crate::Error::Io(std::io::Error::other(e))))
}

/// HTTP API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub const fn new(state: Arc<ApiState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
