//! Shared application state

use std::sync::Arc;

use murmur_core::{AppConfig, ConnectionRegistry, SessionManager};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub registry: ConnectionRegistry,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            sessions: SessionManager::new(config.engine.clone()),
            registry: ConnectionRegistry::new(),
            config: Arc::new(config),
        }
    }
}
