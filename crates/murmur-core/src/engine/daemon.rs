//! Bridge to the persistent recognizer daemon.
//!
//! Voice-activity detection and acoustic inference run in a long-lived
//! Python process; this adapter speaks length-prefixed JSON frames to it
//! over a unix socket. Every call opens its own connection, so a concurrent
//! `teardown` never corrupts an in-flight read.

use serde::Deserialize;
use serde_json::json;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::{EngineActivity, SpeechEngine};
use crate::error::{Error, Result};

/// Upper bound on how long one `next` call may wait for an utterance.
const READ_TIMEOUT: Duration = Duration::from_secs(120);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Daemon startup wait: 100 polls at 100ms each.
const READY_ATTEMPTS: u32 = 100;
const READY_POLL: Duration = Duration::from_millis(100);

/// Reply frame from the daemon; fields are optional per command.
#[derive(Debug, Deserialize)]
struct DaemonReply {
    text: Option<String>,
    is_recording: Option<bool>,
    is_running: Option<bool>,
    error: Option<String>,
}

/// Recognizer engine hosted in a persistent daemon process.
pub struct DaemonEngine {
    socket_path: PathBuf,
    process: Mutex<Option<Child>>,
    recording: AtomicBool,
    running: AtomicBool,
}

impl DaemonEngine {
    /// Spawn (or attach to) the recognizer daemon and initialize it with the
    /// configured model. Blocks for the bounded daemon startup wait plus the
    /// model load time.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let engine = Self {
            socket_path: config.daemon_socket.clone(),
            process: Mutex::new(None),
            recording: AtomicBool::new(false),
            running: AtomicBool::new(false),
        };
        engine.ensure_daemon(config)?;

        let reply = engine.request(&json!({
            "command": "init",
            "model": config.model,
            "language": config.language,
            "silero_sensitivity": config.silero_sensitivity,
            "silero_deactivity_detection": config.silero_deactivity_detection,
            "webrtc_sensitivity": config.webrtc_sensitivity,
            "post_speech_silence_duration": config.post_speech_silence_duration,
            "min_length_of_recording": config.min_length_of_recording,
            "silero_use_onnx": config.silero_use_onnx,
        }))?;
        if let Some(err) = reply.error {
            return Err(Error::EngineInit(err));
        }

        engine.running.store(true, Ordering::SeqCst);
        info!(model = %config.model, language = %config.language, "recognizer daemon initialized");
        Ok(engine)
    }

    fn is_daemon_responding(&self) -> bool {
        self.connect()
            .and_then(|mut stream| exchange(&mut stream, &json!({"command": "check"})))
            .is_ok()
    }

    fn ensure_daemon(&self, config: &EngineConfig) -> Result<()> {
        if self.is_daemon_responding() {
            debug!("recognizer daemon already running");
            return Ok(());
        }

        info!(script = %config.daemon_script.display(), "starting recognizer daemon");
        let child = Command::new(&config.python_cmd)
            .arg(&config.daemon_script)
            .arg("--socket")
            .arg(&self.socket_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::EngineInit(format!("failed to spawn recognizer daemon: {e}")))?;
        *self.process.lock().unwrap() = Some(child);

        for attempt in 0..READY_ATTEMPTS {
            std::thread::sleep(READY_POLL);
            if self.is_daemon_responding() {
                info!("recognizer daemon ready");
                return Ok(());
            }
            if attempt % 20 == 0 {
                debug!("waiting for recognizer daemon... ({}s)", attempt / 10);
            }
        }

        Err(Error::EngineInit(
            "recognizer daemon did not come up within 10 seconds".to_string(),
        ))
    }

    fn connect(&self) -> Result<UnixStream> {
        let stream = UnixStream::connect(&self.socket_path).map_err(|_| Error::EngineOffline)?;
        stream.set_read_timeout(Some(READ_TIMEOUT)).ok();
        stream.set_write_timeout(Some(WRITE_TIMEOUT)).ok();
        Ok(stream)
    }

    fn request(&self, payload: &serde_json::Value) -> Result<DaemonReply> {
        let mut stream = self.connect()?;
        let reply = exchange(&mut stream, payload)?;
        if let Some(recording) = reply.is_recording {
            self.recording.store(recording, Ordering::Relaxed);
        }
        if let Some(running) = reply.is_running {
            self.running.store(running, Ordering::Relaxed);
        }
        Ok(reply)
    }
}

impl SpeechEngine for DaemonEngine {
    fn next_transcript(&self) -> Result<Option<String>> {
        let reply = self.request(&json!({"command": "next"}))?;
        if let Some(err) = reply.error {
            return Err(Error::Engine(err));
        }
        Ok(reply.text.filter(|text| !text.is_empty()))
    }

    fn activity(&self) -> EngineActivity {
        EngineActivity {
            is_recording: self.recording.load(Ordering::Relaxed),
            is_running: self.running.load(Ordering::Relaxed),
        }
    }

    fn teardown(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.recording.store(false, Ordering::SeqCst);

        match self.request(&json!({"command": "shutdown"})) {
            Ok(_) | Err(Error::EngineOffline) => {}
            Err(err) => warn!(error = %err, "recognizer daemon shutdown request failed"),
        }

        // The daemon removes its socket on exit; give it a moment before
        // reaping the child.
        for _ in 0..50 {
            if !self.socket_path.exists() {
                break;
            }
            std::thread::sleep(READY_POLL);
        }
        if let Some(mut child) = self.process.lock().unwrap().take() {
            let _ = child.kill();
            let _ = child.wait();
        }

        info!("recognizer daemon stopped");
        Ok(())
    }
}

fn exchange(stream: &mut UnixStream, payload: &serde_json::Value) -> Result<DaemonReply> {
    let data = serde_json::to_vec(payload)?;
    write_frame(stream, &data)?;
    let reply = read_frame(stream)?;
    Ok(serde_json::from_slice(&reply)?)
}

/// Write one u32-big-endian length-prefixed frame.
fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    writer.write_all(&(payload.len() as u32).to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

/// Read one u32-big-endian length-prefixed frame.
fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}
