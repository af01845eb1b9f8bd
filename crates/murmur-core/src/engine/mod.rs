//! Engine abstraction for the shared speech recognizer.
//!
//! The recognition algorithm itself is an external collaborator; this module
//! defines the blocking capability surface the session manager drives and the
//! factory that selects a concrete backend from configuration.

mod daemon;

pub use daemon::DaemonEngine;

use std::sync::Arc;

use crate::config::{EngineBackend, EngineConfig};
use crate::error::Result;

/// Point-in-time engine activity, readable at any time without blocking.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineActivity {
    pub is_recording: bool,
    pub is_running: bool,
}

/// Blocking capability surface of a speech recognition engine.
///
/// Construction and `teardown` may each take seconds. `next_transcript`
/// blocks for the duration of an utterance. Implementations must tolerate
/// `teardown` racing one in-flight `next_transcript` call; the read fails
/// fast instead of hanging.
pub trait SpeechEngine: Send + Sync {
    /// Block until the next completed utterance; `None` while idle.
    fn next_transcript(&self) -> Result<Option<String>>;

    /// Cheap activity snapshot; never waits on recognition work.
    fn activity(&self) -> EngineActivity;

    /// Release all engine resources, blocking until done.
    fn teardown(&self) -> Result<()>;
}

/// Construct the engine backend selected by configuration.
pub fn create_engine(config: &EngineConfig) -> Result<Arc<dyn SpeechEngine>> {
    match config.backend {
        EngineBackend::PythonDaemon => Ok(Arc::new(DaemonEngine::new(config)?)),
    }
}
