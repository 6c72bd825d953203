//! HTTP front end for the narrative engine.
//!
//! Exposes scene generation, choice generation and story lookup as JSON
//! endpoints:
//!
//! | Method | Path                    |
//! |--------|-------------------------|
//! | GET    | `/health`               |
//! | POST   | `/api/generate/scene`   |
//! | POST   | `/api/generate/choices` |
//! | GET    | `/api/story/{story_id}` |

pub mod config;
pub mod error;
pub mod routes;

pub use config::{AppConfig, ConfigError};
pub use error::{ApiError, ApiJson};

use axum::routing::{get, post};
use axum::Router;
use narrative_core::NarrativeService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<NarrativeService>,
}

impl AppState {
    pub fn new(service: NarrativeService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/generate/scene", post(routes::generate_scene))
        .route("/api/generate/choices", post(routes::generate_choices))
        .route("/api/story/{story_id}", get(routes::get_story))
        .with_state(state)
}

/// Serve on an already-bound listener until ctrl-c.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "narrative service listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

/// Bind `addr` and serve until ctrl-c.
pub async fn bind_and_serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state).await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}
