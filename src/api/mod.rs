//! HTTP query/stream surface
//!
//! Read-only views over the event log plus the chat endpoint. CORS is
//! permissive; the dashboard frontend is served separately.

pub mod alerts;
pub mod error;
pub mod system;
pub mod threats;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use error::{ApiError, ApiResult};

use crate::config::Config;
use crate::database::Database;
use crate::geolocate::GeoService;
use crate::llm::LlmClient;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub geo: Arc<GeoService>,
    pub llm: LlmClient,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/threats", get(threats::snapshot))
        .route("/api/threats/stream", get(threats::stream))
        .route("/api/threats/export", get(threats::export))
        .route("/api/alerts", get(alerts::list))
        .route("/api/alerts/stats", get(alerts::stats))
        .route("/api/geolocation/{ip}", get(system::geolocation))
        .route("/api/health", get(system::health))
        .route("/api/chat", post(system::chat))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until the shutdown signal flips
pub async fn serve(state: AppState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let port = state.config.api.listen_port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    Ok(())
}
