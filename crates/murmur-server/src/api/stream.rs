//! WebSocket streaming endpoints.
//!
//! `/ws` pushes deduplicated transcripts to one client; `/status-ws` pushes
//! engine status snapshots on a fixed cadence. Each connection runs in its
//! own task; failures and disconnects never cross connections.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use murmur_core::{Error, TranscriptDedup, TranscriptEvent};

use super::messages::{StatusMessage, TranscriptMessage};
use crate::state::AppState;

/// Live transcription stream.
pub async fn transcripts(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| serve_transcripts(state, socket))
}

async fn serve_transcripts(state: AppState, socket: WebSocket) {
    let mut client = state.registry.register();
    let client_id = client.id();
    info!(client = %client_id, "transcription client connected");

    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the liveness check so an engine stop landing between
    // the two cannot be missed.
    let mut events = state.sessions.subscribe();
    if !state.sessions.is_running() {
        let _ = send_json(&mut sender, &TranscriptMessage::offline()).await;
        info!(client = %client_id, "engine offline, closing transcription stream");
        return;
    }

    let mut dedup = TranscriptDedup::default();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(TranscriptEvent::Transcript(text)) => {
                    if !dedup.accept(&text) {
                        continue;
                    }
                    if let Err(err) = send_json(&mut sender, &TranscriptMessage::transcription(&text)).await {
                        warn!(client = %client_id, error = %Error::Transport(err.to_string()), "transcript push failed");
                        break;
                    }
                }
                Ok(TranscriptEvent::EngineStopped) | Err(RecvError::Closed) => {
                    let _ = send_json(&mut sender, &TranscriptMessage::offline()).await;
                    info!(client = %client_id, "engine stopped, closing transcription stream");
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(client = %client_id, skipped, "transcription client lagging, skipping ahead");
                }
            },
            frame = receiver.next() => match frame {
                None | Some(Ok(Message::Close(_))) => {
                    info!(client = %client_id, "transcription client disconnected");
                    break;
                }
                Some(Err(err)) => {
                    warn!(client = %client_id, error = %Error::Transport(err.to_string()), "transcription socket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
            _ = client.closed() => {
                info!(client = %client_id, "transcription stream closed by server");
                break;
            }
        }
    }
}

/// Periodic engine status stream.
pub async fn status_updates(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| serve_status(state, socket))
}

async fn serve_status(state: AppState, socket: WebSocket) {
    info!("status client connected");
    let (mut sender, mut receiver) = socket.split();

    let mut ticker = interval(state.config.server.status_interval());
    // Slow sends drop ticks; every push carries a fresh snapshot, never a
    // backlog.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = state.sessions.status();
                if let Err(err) = send_json(&mut sender, &StatusMessage::new(snapshot)).await {
                    debug!(error = %Error::Transport(err.to_string()), "status push failed, closing");
                    break;
                }
            }
            frame = receiver.next() => match frame {
                None | Some(Ok(Message::Close(_))) => {
                    info!("status client disconnected");
                    break;
                }
                Some(Err(err)) => {
                    warn!(error = %Error::Transport(err.to_string()), "status socket error");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }
}

async fn send_json<T: Serialize>(
    sender: &mut SplitSink<WebSocket, Message>,
    payload: &T,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(payload) {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "failed to serialize outbound payload");
            return Ok(());
        }
    };
    sender.send(Message::Text(text)).await
}
