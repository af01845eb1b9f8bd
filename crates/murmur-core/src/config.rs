//! Configuration types for the murmur transcription service

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::error;

/// Top-level configuration, loaded once at startup.
///
/// Engine keys sit at the top level of the file (`MODEL`, `LANGUAGE` and the
/// recognizer tunables); the `server` section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load configuration from a JSON file, falling back to defaults.
    ///
    /// A missing or malformed file is recovered locally and logged; startup
    /// never fails on configuration problems.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_json(&raw).unwrap_or_else(|err| {
                error!(path = %path.display(), error = %err, "invalid configuration, using defaults");
                Self::default()
            }),
            Err(err) => {
                error!(path = %path.display(), error = %err, "configuration file not readable, using defaults");
                Self::default()
            }
        }
    }

    /// Parse a JSON configuration document.
    pub fn from_json(raw: &str) -> crate::Result<Self> {
        serde_json::from_str(raw).map_err(|err| crate::Error::Config(err.to_string()))
    }
}

/// Selects the concrete engine implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineBackend {
    /// Recognizer hosted in a persistent Python daemon process.
    #[default]
    PythonDaemon,
}

/// Recognizer engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Acoustic model identifier
    #[serde(rename = "MODEL", default = "default_model")]
    pub model: String,

    /// ISO language code
    #[serde(rename = "LANGUAGE", default = "default_language")]
    pub language: String,

    /// Silero voice-activity sensitivity (0..1)
    #[serde(default = "default_silero_sensitivity")]
    pub silero_sensitivity: f32,

    /// Use Silero for end-of-speech detection as well
    #[serde(default = "default_true")]
    pub silero_deactivity_detection: bool,

    /// WebRTC voice-activity aggressiveness (0..3)
    #[serde(default = "default_webrtc_sensitivity")]
    pub webrtc_sensitivity: u8,

    /// Silence after speech before an utterance is finalized, seconds
    #[serde(default = "default_post_speech_silence")]
    pub post_speech_silence_duration: f32,

    /// Minimum utterance length, seconds
    #[serde(default = "default_min_recording_length")]
    pub min_length_of_recording: f32,

    /// Run the Silero detector through onnxruntime
    #[serde(default = "default_true")]
    pub silero_use_onnx: bool,

    /// Which engine implementation to construct
    #[serde(default)]
    pub backend: EngineBackend,

    /// Pause between transcript pulls, milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Unix socket the recognizer daemon listens on
    #[serde(default = "default_daemon_socket")]
    pub daemon_socket: PathBuf,

    /// Script hosting the recognizer daemon
    #[serde(default = "default_daemon_script")]
    pub daemon_script: PathBuf,

    /// Interpreter used to launch the daemon
    #[serde(default = "default_python_cmd")]
    pub python_cmd: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            language: default_language(),
            silero_sensitivity: default_silero_sensitivity(),
            silero_deactivity_detection: default_true(),
            webrtc_sensitivity: default_webrtc_sensitivity(),
            post_speech_silence_duration: default_post_speech_silence(),
            min_length_of_recording: default_min_recording_length(),
            silero_use_onnx: default_true(),
            backend: EngineBackend::default(),
            poll_interval_ms: default_poll_interval_ms(),
            daemon_socket: default_daemon_socket(),
            daemon_script: default_daemon_script(),
            python_cmd: default_python_cmd(),
        }
    }
}

impl EngineConfig {
    /// Pause between transcript pulls; a latency/CPU trade-off, not a
    /// correctness requirement.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_model() -> String {
    "base.en".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_silero_sensitivity() -> f32 {
    0.6
}

fn default_true() -> bool {
    true
}

fn default_webrtc_sensitivity() -> u8 {
    2
}

fn default_post_speech_silence() -> f32 {
    0.8
}

fn default_min_recording_length() -> f32 {
    1.0
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_daemon_socket() -> PathBuf {
    PathBuf::from("/tmp/murmur_stt_daemon.sock")
}

fn default_daemon_script() -> PathBuf {
    PathBuf::from("scripts/stt_daemon.py")
}

fn default_python_cmd() -> String {
    "python3".to_string()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Cadence of `/status-ws` pushes, seconds
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
            status_interval_secs: default_status_interval_secs(),
        }
    }
}

impl ServerConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:8000".to_string(),
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}

fn default_status_interval_secs() -> u64 {
    2
}
