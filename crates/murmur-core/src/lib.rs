//! Murmur Core - Transcription Session Management
//!
//! This crate owns the single shared speech recognition engine behind the
//! murmur streaming backend: its lifecycle (initialize, run, shut down),
//! serialized access to its blocking result stream, fan-out of transcripts
//! to any number of subscribers, and status snapshots that stay answerable
//! while the engine is busy.
//!
//! # Architecture
//!
//! - [`SessionManager`] guards every lifecycle transition behind one
//!   exclusive critical section and runs blocking engine work on worker
//!   threads off the event path.
//! - A single pump task is the only caller of the engine's blocking read;
//!   results reach clients through a broadcast channel.
//! - [`ConnectionRegistry`] tracks live client connections for coordinated
//!   teardown.

pub mod config;
pub mod engine;
pub mod error;
pub mod session;

pub use config::{AppConfig, EngineBackend, EngineConfig, ServerConfig};
pub use engine::{create_engine, DaemonEngine, EngineActivity, SpeechEngine};
pub use error::{Error, Result};
pub use session::{
    normalize_transcript, ClientGuard, ConnectionRegistry, EngineFactory, Lifecycle,
    SessionManager, StartOutcome, StatusSnapshot, StopOutcome, TranscriptDedup, TranscriptEvent,
    TRANSCRIPT_CHANNEL_CAPACITY,
};
