//! HTTP and WebSocket API surface.

mod messages;
mod stream;

use axum::extract::State;
use axum::http::HeaderValue;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use murmur_core::{ServerConfig, StartOutcome, StatusSnapshot, StopOutcome};

use crate::state::AppState;
use messages::Envelope;

/// Assemble the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server);
    Router::new()
        .route("/", get(root))
        .route("/status", get(status))
        .route("/start", get(start))
        .route("/shutdown", get(shutdown))
        .route("/ws", get(stream::transcripts))
        .route("/status-ws", get(stream::status_updates))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    if config.cors_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Liveness and info message.
async fn root() -> Json<Envelope> {
    Json(Envelope::info("Transcription backend online"))
}

/// Current engine status snapshot; always answerable.
async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.sessions.status())
}

/// Administrative start: bring the shared engine up.
async fn start(State(state): State<AppState>) -> Json<Envelope> {
    info!("engine start requested");
    let envelope = match state.sessions.initialize().await {
        StartOutcome::Started => Envelope::info("Engine started"),
        StartOutcome::AlreadyRunning => Envelope::info("Engine already running"),
        StartOutcome::AlreadyInitializing => Envelope::info("Engine already initializing"),
        StartOutcome::ShuttingDown => Envelope::error("Engine is shutting down"),
        StartOutcome::Failed(err) => Envelope::error(format!("Failed to start engine: {err}")),
    };
    Json(envelope)
}

/// Administrative shutdown: release the shared engine.
async fn shutdown(State(state): State<AppState>) -> Json<Envelope> {
    info!("engine shutdown requested");
    let envelope = match state.sessions.shutdown().await {
        StopOutcome::Stopped => Envelope::info("Engine stopped"),
        StopOutcome::AlreadyStopped => Envelope::info("Engine already stopped"),
        StopOutcome::NotReady => Envelope::error("Engine is still initializing"),
    };
    Json(envelope)
}
