//! Bookkeeping for live transcription connections.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Concurrency-safe set of live transcription clients.
///
/// Registration hands back a guard whose `Drop` removes the entry, so
/// cleanup happens on every exit path. `close_all` signals every tracked
/// connection to shut down; it runs before engine teardown at process exit.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    clients: Arc<Mutex<HashMap<Uuid, mpsc::Sender<()>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection, returning its guard.
    pub fn register(&self) -> ClientGuard {
        let id = Uuid::new_v4();
        let (close_tx, close_rx) = mpsc::channel(1);
        let count = {
            let mut clients = self.clients.lock().unwrap();
            clients.insert(id, close_tx);
            clients.len()
        };
        debug!(client = %id, clients = count, "transcription client registered");
        ClientGuard {
            id,
            registry: self.clone(),
            close_rx,
        }
    }

    /// Untrack a connection; removing an absent entry is a no-op.
    pub fn remove(&self, id: Uuid) {
        self.clients.lock().unwrap().remove(&id);
    }

    /// Number of currently tracked connections.
    pub fn size(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Ask every tracked connection to close.
    pub fn close_all(&self) {
        let clients = self.clients.lock().unwrap();
        info!(clients = clients.len(), "closing all transcription connections");
        for sender in clients.values() {
            let _ = sender.try_send(());
        }
    }
}

/// Registration handle for one connection; deregisters on drop.
pub struct ClientGuard {
    id: Uuid,
    registry: ConnectionRegistry,
    close_rx: mpsc::Receiver<()>,
}

impl ClientGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Resolves when the registry asks this connection to close.
    pub async fn closed(&mut self) {
        let _ = self.close_rx.recv().await;
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
        debug!(client = %self.id, "transcription client deregistered");
    }
}
