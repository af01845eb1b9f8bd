//! Murmur Server - live speech-to-text streaming over HTTP and WebSockets

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod state;

use murmur_core::{AppConfig, ConnectionRegistry, StartOutcome, StopOutcome};
use state::AppState;

const DEFAULT_LOG_FILTER: &str = "murmur_server=debug,murmur_core=debug,tower_http=debug";
const LOG_FILE: &str = "server.log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    info!("Starting murmur transcription server");

    let config = AppConfig::load(config_path());
    info!(model = %config.engine.model, language = %config.engine.language, "configuration loaded");

    let state = AppState::new(config);

    // Warm the engine in the background so the API answers immediately while
    // the model loads.
    {
        let sessions = state.sessions.clone();
        tokio::spawn(async move {
            info!("initializing transcription engine in background");
            match sessions.initialize().await {
                StartOutcome::Started => info!("transcription engine ready"),
                StartOutcome::Failed(err) => {
                    error!(error = %err, "background engine initialization failed")
                }
                other => debug!(outcome = ?other, "background initialization skipped"),
            }
        });
    }

    let app = api::create_router(state.clone());

    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.registry.clone()))
        .await?;

    // Every tracked connection has been asked to close by now; release the
    // engine last.
    match state.sessions.shutdown().await {
        StopOutcome::Stopped => info!("engine released"),
        StopOutcome::AlreadyStopped => debug!("engine was already stopped"),
        StopOutcome::NotReady => error!("engine still initializing at exit"),
    }
    info!("Server stopped");

    Ok(())
}

/// Wait for ctrl-c, then close tracked connections so the serve loop can
/// drain before the engine is torn down.
async fn shutdown_signal(registry: ConnectionRegistry) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
    registry.close_all();
}

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match std::fs::File::options().create(true).append(true).open(LOG_FILE) {
        Ok(file) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
            .init(),
        Err(err) => {
            registry.init();
            error!(error = %err, "cannot open log file, logging to console only");
        }
    }
}
