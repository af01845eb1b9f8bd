//! Wire payloads shared by the HTTP endpoints and WebSocket streams.

use std::time::{SystemTime, UNIX_EPOCH};

use murmur_core::StatusSnapshot;
use serde::Serialize;

/// Seconds since the unix epoch, fractional.
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

/// Envelope for plain HTTP responses.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub time: f64,
}

impl Envelope {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: "info",
            time: unix_time(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: "error",
            time: unix_time(),
        }
    }
}

/// One transcription stream message.
#[derive(Debug, Serialize)]
pub struct TranscriptMessage {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub time: f64,
}

impl TranscriptMessage {
    pub fn transcription(text: &str) -> Self {
        Self {
            text: text.to_string(),
            kind: "transcription",
            time: unix_time(),
        }
    }

    /// The single terminal error a stream client sees when no engine is
    /// available.
    pub fn offline() -> Self {
        Self {
            text: "Engine is offline".to_string(),
            kind: "error",
            time: unix_time(),
        }
    }
}

/// One status stream message.
#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub status: StatusSnapshot,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub time: f64,
}

impl StatusMessage {
    pub fn new(status: StatusSnapshot) -> Self {
        Self {
            status,
            kind: "status",
            time: unix_time(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_uses_wire_field_names() {
        let value = serde_json::to_value(Envelope::info("Engine started")).unwrap();
        assert_eq!(value["message"], "Engine started");
        assert_eq!(value["type"], "info");
        assert!(value["time"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn offline_message_is_error_typed() {
        let value = serde_json::to_value(TranscriptMessage::offline()).unwrap();
        assert_eq!(value["text"], "Engine is offline");
        assert_eq!(value["type"], "error");
    }

    #[test]
    fn status_message_nests_the_snapshot() {
        let snapshot = StatusSnapshot {
            is_recording: false,
            is_running: true,
            is_shut_down: false,
            is_initializing: false,
            error: None,
        };
        let value = serde_json::to_value(StatusMessage::new(snapshot)).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["status"]["is_running"], true);
        assert!(value["status"].get("error").is_none());
    }
}
