// ABOUTME: Shared application state for the devstate HTTP server.
// ABOUTME: Holds the persistence engine that every request handler writes through.

use std::sync::Arc;

use devstate_store::{EngineConfig, PersistenceEngine};

/// Shared application state accessible by all Axum handlers.
pub struct AppState {
    pub engine: Arc<PersistenceEngine>,
}

/// Type alias for the Arc-wrapped state used with Axum's State extractor.
pub type SharedState = Arc<AppState>;

impl AppState {
    /// Create an AppState around a new engine built from `config`.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            engine: Arc::new(PersistenceEngine::new(config)),
        }
    }
}
