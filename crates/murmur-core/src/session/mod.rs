//! Engine lifecycle control and shared session state.
//!
//! One [`SessionManager`] owns the single shared recognizer engine. All
//! lifecycle transitions go through its exclusive critical section; the slow
//! blocking construction and teardown run on worker threads outside the
//! lock, so status reads stay answerable throughout. Transcripts fan out to
//! any number of subscribers through a broadcast channel fed by a single
//! pump task.

mod pump;
mod registry;

pub use pump::{normalize_transcript, TranscriptDedup, TranscriptEvent, TRANSCRIPT_CHANNEL_CAPACITY};
pub use registry::{ClientGuard, ConnectionRegistry};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::engine::{self, SpeechEngine};
use crate::error::{Error, Result};

/// Engine availability states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initializing,
    Running,
    ShuttingDown,
    ShutDown,
}

/// Outcome of an initialize request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    AlreadyInitializing,
    ShuttingDown,
    Failed(String),
}

/// Outcome of a shutdown request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
    /// A construction is in flight; there is no handle to tear down yet.
    NotReady,
}

/// Point-in-time view of engine readiness, computed fresh at every read.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub is_recording: bool,
    pub is_running: bool,
    pub is_shut_down: bool,
    pub is_initializing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Factory producing the engine backend; the seam through which tests
/// substitute scripted engines.
pub type EngineFactory = Arc<dyn Fn(&EngineConfig) -> Result<Arc<dyn SpeechEngine>> + Send + Sync>;

struct EngineSlot {
    lifecycle: Lifecycle,
    engine: Option<Arc<dyn SpeechEngine>>,
    pump: Option<pump::PumpHandle>,
    last_error: Option<String>,
}

struct Inner {
    config: EngineConfig,
    factory: EngineFactory,
    slot: Mutex<EngineSlot>,
    initializing: AtomicBool,
    events: broadcast::Sender<TranscriptEvent>,
}

/// Owns the one shared engine and coordinates every lifecycle transition.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_engine_factory(config, Arc::new(|config| engine::create_engine(config)))
    }

    /// Build a manager around a custom engine factory.
    pub fn with_engine_factory(config: EngineConfig, factory: EngineFactory) -> Self {
        let (events, _) = broadcast::channel(TRANSCRIPT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                slot: Mutex::new(EngineSlot {
                    lifecycle: Lifecycle::Uninitialized,
                    engine: None,
                    pump: None,
                    last_error: None,
                }),
                initializing: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Subscribe to the transcript fan-out.
    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.slot.lock().unwrap().lifecycle == Lifecycle::Running
    }

    /// Bring the engine up.
    ///
    /// At most one construction is ever in flight; concurrent callers get an
    /// idempotent no-op signal. The transition completes even if this future
    /// is dropped mid-way (the work runs on a detached task).
    pub async fn initialize(&self) -> StartOutcome {
        {
            let mut slot = self.inner.slot.lock().unwrap();
            match slot.lifecycle {
                Lifecycle::Running => return StartOutcome::AlreadyRunning,
                Lifecycle::Initializing => return StartOutcome::AlreadyInitializing,
                Lifecycle::ShuttingDown => return StartOutcome::ShuttingDown,
                Lifecycle::Uninitialized | Lifecycle::ShutDown => {
                    slot.lifecycle = Lifecycle::Initializing;
                    self.inner.initializing.store(true, Ordering::SeqCst);
                }
            }
        }

        let inner = Arc::clone(&self.inner);
        let transition = tokio::spawn(async move {
            let factory = Arc::clone(&inner.factory);
            let config = inner.config.clone();
            let built = match tokio::task::spawn_blocking(move || factory(&config)).await {
                Ok(result) => result,
                Err(err) => Err(Error::EngineInit(format!("engine construction panicked: {err}"))),
            };

            let mut slot = inner.slot.lock().unwrap();
            inner.initializing.store(false, Ordering::SeqCst);
            match built {
                Ok(engine) => {
                    slot.pump = Some(pump::spawn(
                        Arc::clone(&engine),
                        inner.events.clone(),
                        inner.config.poll_interval(),
                    ));
                    slot.engine = Some(engine);
                    slot.lifecycle = Lifecycle::Running;
                    slot.last_error = None;
                    info!("transcription engine running");
                    StartOutcome::Started
                }
                Err(err) => {
                    slot.engine = None;
                    slot.lifecycle = Lifecycle::Uninitialized;
                    slot.last_error = Some(err.to_string());
                    error!(error = %err, "engine initialization failed");
                    StartOutcome::Failed(err.to_string())
                }
            }
        });

        match transition.await {
            Ok(outcome) => outcome,
            Err(err) => StartOutcome::Failed(format!("initialization task failed: {err}")),
        }
    }

    /// Tear the engine down.
    ///
    /// Rejected while a construction is in flight so a half-built handle is
    /// never touched. Like [`initialize`](Self::initialize), the transition
    /// survives the caller going away.
    pub async fn shutdown(&self) -> StopOutcome {
        let engine = {
            let mut slot = self.inner.slot.lock().unwrap();
            match slot.lifecycle {
                Lifecycle::Initializing | Lifecycle::ShuttingDown => return StopOutcome::NotReady,
                _ => {}
            }
            let Some(engine) = slot.engine.take() else {
                return StopOutcome::AlreadyStopped;
            };
            slot.lifecycle = Lifecycle::ShuttingDown;
            if let Some(pump) = slot.pump.take() {
                pump.stop();
            }
            engine
        };

        info!("shutting down transcription engine");
        let inner = Arc::clone(&self.inner);
        let transition = tokio::spawn(async move {
            match tokio::task::spawn_blocking(move || engine.teardown()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(error = %err, "engine teardown reported an error"),
                Err(err) => error!(error = %err, "engine teardown panicked"),
            }

            inner.slot.lock().unwrap().lifecycle = Lifecycle::ShutDown;
            let _ = inner.events.send(TranscriptEvent::EngineStopped);
            info!("transcription engine stopped");
        });
        let _ = transition.await;

        StopOutcome::Stopped
    }

    /// Compute a fresh status snapshot.
    ///
    /// Construction and teardown both run outside the slot lock, so this
    /// never waits on them; it reads a flag and the slot fields.
    pub fn status(&self) -> StatusSnapshot {
        let is_initializing = self.inner.initializing.load(Ordering::SeqCst);
        let slot = self.inner.slot.lock().unwrap();
        let activity = slot
            .engine
            .as_ref()
            .map(|engine| engine.activity())
            .unwrap_or_default();
        StatusSnapshot {
            is_recording: activity.is_recording,
            is_running: activity.is_running,
            is_shut_down: slot.engine.is_none() && !is_initializing,
            is_initializing,
            error: slot.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineActivity;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;
    use tokio::time::timeout;

    struct ScriptedEngine {
        transcripts: Mutex<VecDeque<&'static str>>,
        teardowns: Arc<AtomicUsize>,
    }

    impl ScriptedEngine {
        fn new(lines: &[&'static str], teardowns: Arc<AtomicUsize>) -> Arc<Self> {
            Arc::new(Self {
                transcripts: Mutex::new(lines.iter().copied().collect()),
                teardowns,
            })
        }
    }

    impl SpeechEngine for ScriptedEngine {
        fn next_transcript(&self) -> Result<Option<String>> {
            Ok(self
                .transcripts
                .lock()
                .unwrap()
                .pop_front()
                .map(str::to_string))
        }

        fn activity(&self) -> EngineActivity {
            EngineActivity {
                is_recording: false,
                is_running: true,
            }
        }

        fn teardown(&self) -> Result<()> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Counters {
        constructions: Arc<AtomicUsize>,
        teardowns: Arc<AtomicUsize>,
    }

    fn scripted_manager(lines: &'static [&'static str]) -> (SessionManager, Counters) {
        let constructions = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counters = Counters {
            constructions: Arc::clone(&constructions),
            teardowns: Arc::clone(&teardowns),
        };
        let manager = SessionManager::with_engine_factory(
            EngineConfig::default(),
            Arc::new(move |_| {
                constructions.fetch_add(1, Ordering::SeqCst);
                Ok(ScriptedEngine::new(lines, Arc::clone(&teardowns)) as Arc<dyn SpeechEngine>)
            }),
        );
        (manager, counters)
    }

    /// Manager whose factory blocks until the returned sender fires.
    fn gated_manager() -> (SessionManager, std_mpsc::Sender<()>, Counters) {
        let (gate_tx, gate_rx) = std_mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let constructions = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counters = Counters {
            constructions: Arc::clone(&constructions),
            teardowns: Arc::clone(&teardowns),
        };
        let manager = SessionManager::with_engine_factory(
            EngineConfig::default(),
            Arc::new(move |_| {
                gate_rx.lock().unwrap().recv().ok();
                constructions.fetch_add(1, Ordering::SeqCst);
                Ok(ScriptedEngine::new(&[], Arc::clone(&teardowns)) as Arc<dyn SpeechEngine>)
            }),
        );
        (manager, gate_tx, counters)
    }

    async fn wait_until_initializing(manager: &SessionManager) {
        for _ in 0..500 {
            if manager.status().is_initializing {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("manager never entered the initializing state");
    }

    #[tokio::test]
    async fn start_twice_reports_already_running() {
        let (manager, counters) = scripted_manager(&[]);
        assert_eq!(manager.initialize().await, StartOutcome::Started);
        assert_eq!(manager.initialize().await, StartOutcome::AlreadyRunning);
        assert_eq!(counters.constructions.load(Ordering::SeqCst), 1);

        let status = manager.status();
        assert!(status.is_running);
        assert!(!status.is_shut_down);
    }

    #[tokio::test]
    async fn stop_without_engine_is_a_noop() {
        let (manager, counters) = scripted_manager(&[]);
        assert_eq!(manager.shutdown().await, StopOutcome::AlreadyStopped);
        assert_eq!(counters.teardowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_starts_build_one_engine() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&constructions);
        let manager = SessionManager::with_engine_factory(
            EngineConfig::default(),
            Arc::new(move |_| {
                std::thread::sleep(Duration::from_millis(100));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ScriptedEngine::new(&[], Arc::clone(&teardowns)) as Arc<dyn SpeechEngine>)
            }),
        );

        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.initialize().await }));
        }
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        let started = outcomes
            .iter()
            .filter(|outcome| **outcome == StartOutcome::Started)
            .count();
        assert_eq!(started, 1);
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        for outcome in outcomes {
            assert!(matches!(
                outcome,
                StartOutcome::Started
                    | StartOutcome::AlreadyInitializing
                    | StartOutcome::AlreadyRunning
            ));
        }
        assert!(manager.is_running());
    }

    #[tokio::test]
    async fn shutdown_is_rejected_while_initializing() {
        let (manager, gate, counters) = gated_manager();

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.initialize().await })
        };
        wait_until_initializing(&manager).await;

        assert_eq!(manager.shutdown().await, StopOutcome::NotReady);
        assert_eq!(counters.teardowns.load(Ordering::SeqCst), 0);

        gate.send(()).unwrap();
        assert_eq!(pending.await.unwrap(), StartOutcome::Started);
        assert_eq!(manager.shutdown().await, StopOutcome::Stopped);
        assert_eq!(counters.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn status_stays_answerable_while_initializing() {
        let (manager, gate, _counters) = gated_manager();

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.initialize().await })
        };
        wait_until_initializing(&manager).await;

        let status = manager.status();
        assert!(status.is_initializing);
        assert!(!status.is_running);
        assert!(!status.is_shut_down);

        gate.send(()).unwrap();
        assert_eq!(pending.await.unwrap(), StartOutcome::Started);
    }

    #[tokio::test]
    async fn failed_initialization_reverts_and_allows_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let manager = SessionManager::with_engine_factory(
            EngineConfig::default(),
            Arc::new(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::EngineInit("model missing".to_string()))
                } else {
                    Ok(ScriptedEngine::new(&[], Arc::clone(&teardowns)) as Arc<dyn SpeechEngine>)
                }
            }),
        );

        match manager.initialize().await {
            StartOutcome::Failed(message) => assert!(message.contains("model missing")),
            other => panic!("expected failure, got {other:?}"),
        }

        let status = manager.status();
        assert!(status.is_shut_down);
        assert!(!status.is_initializing);
        assert!(status.error.as_deref().unwrap().contains("model missing"));

        assert_eq!(manager.initialize().await, StartOutcome::Started);
        assert!(manager.status().error.is_none());
    }

    #[tokio::test]
    async fn fanout_trims_and_clients_dedup() {
        let (manager, _counters) =
            scripted_manager(&["hello", "  hello  ", "hello world", "   ", ""]);
        let mut events = manager.subscribe();

        assert_eq!(manager.initialize().await, StartOutcome::Started);

        let mut raw = Vec::new();
        while raw.len() < 3 {
            match timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for transcripts")
                .unwrap()
            {
                TranscriptEvent::Transcript(text) => raw.push(text.to_string()),
                TranscriptEvent::EngineStopped => panic!("engine stopped early"),
            }
        }
        // Whitespace-only reads never surface; repeats do (dedup is per client).
        assert_eq!(raw, ["hello", "hello", "hello world"]);

        let mut dedup = TranscriptDedup::default();
        let delivered: Vec<&String> = raw.iter().filter(|text| dedup.accept(text)).collect();
        assert_eq!(delivered, ["hello", "hello world"]);

        assert_eq!(manager.shutdown().await, StopOutcome::Stopped);
        loop {
            match timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for the stop event")
                .unwrap()
            {
                TranscriptEvent::EngineStopped => break,
                TranscriptEvent::Transcript(_) => {}
            }
        }
    }

    #[test]
    fn snapshot_omits_error_field_when_clear() {
        let snapshot = StatusSnapshot {
            is_recording: false,
            is_running: true,
            is_shut_down: false,
            is_initializing: false,
            error: None,
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["is_running"], true);
        assert!(value.get("error").is_none());

        let snapshot = StatusSnapshot {
            error: Some("boom".to_string()),
            ..snapshot
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["error"], "boom");
    }
}
