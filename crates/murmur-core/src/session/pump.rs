//! Single-consumer transcript pump and per-client dedup.
//!
//! Only the pump calls the engine's blocking read, once per result; every
//! subscriber observes the same stream through a broadcast channel. This
//! keeps the engine's internal result cursor deterministic no matter how
//! many clients are attached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::engine::SpeechEngine;

/// Fan-out channel capacity; laggards skip ahead instead of queueing.
pub const TRANSCRIPT_CHANNEL_CAPACITY: usize = 256;

/// Events observed by transcription subscribers.
#[derive(Debug, Clone)]
pub enum TranscriptEvent {
    /// A completed utterance, trimmed and non-empty.
    Transcript(Arc<str>),
    /// The engine stopped producing results; attached streams should close.
    EngineStopped,
}

/// Control handle for a running pump task.
pub(crate) struct PumpHandle {
    stop: Arc<AtomicBool>,
}

impl PumpHandle {
    pub(crate) fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Spawn the pump for a freshly initialized engine.
///
/// The pump exits when signalled, or when a read fails (engine torn down
/// underneath it); either way it announces `EngineStopped` on the way out.
pub(crate) fn spawn(
    engine: Arc<dyn SpeechEngine>,
    events: broadcast::Sender<TranscriptEvent>,
    poll_interval: Duration,
) -> PumpHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        debug!("transcript pump started");
        while !flag.load(Ordering::SeqCst) {
            let reader = Arc::clone(&engine);
            match tokio::task::spawn_blocking(move || reader.next_transcript()).await {
                Ok(Ok(Some(raw))) => {
                    if let Some(text) = normalize_transcript(&raw) {
                        let _ = events.send(TranscriptEvent::Transcript(Arc::from(text)));
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(err)) => {
                    if !flag.load(Ordering::SeqCst) {
                        warn!(error = %err, "transcript read failed, stopping pump");
                    }
                    break;
                }
                Err(err) => {
                    error!(error = %err, "transcript reader panicked");
                    break;
                }
            }
            // Bounds CPU spin while the engine is idle.
            tokio::time::sleep(poll_interval).await;
        }
        let _ = events.send(TranscriptEvent::EngineStopped);
        debug!("transcript pump stopped");
    });
    PumpHandle { stop }
}

/// Trim a raw engine result; `None` when nothing remains.
pub fn normalize_transcript(raw: &str) -> Option<&str> {
    let text = raw.trim();
    (!text.is_empty()).then_some(text)
}

/// Last-value dedup cursor, one per client stream.
#[derive(Debug, Default)]
pub struct TranscriptDedup {
    last: String,
}

impl TranscriptDedup {
    /// Whether `text` should be delivered: anything except an exact repeat
    /// of the previous delivery.
    pub fn accept(&mut self, text: &str) -> bool {
        if text == self.last {
            return false;
        }
        self.last.clear();
        self.last.push_str(text);
        true
    }
}
