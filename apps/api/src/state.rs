use std::sync::Arc;

use crate::config::Config;
use crate::documents::lineage::VersionLineageManager;
use crate::documents::store::DocumentStore;
use crate::generation::engine::WorkflowEngine;
use crate::generation::registry::SessionRegistry;
use crate::generation::session::GenerationContext;
use crate::generation::snapshot::SnapshotStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Postgres or in-memory, chosen by STORAGE_BACKEND.
    pub store: Arc<dyn DocumentStore>,
    pub engine: Arc<dyn WorkflowEngine>,
    pub sessions: SessionRegistry,
    /// Redis when REDIS_URL is set, process memory otherwise.
    pub snapshots: Arc<dyn SnapshotStore>,
    pub config: Config,
}

impl AppState {
    pub fn lineage(&self) -> VersionLineageManager {
        VersionLineageManager::new(self.store.clone())
    }

    pub fn generation(&self) -> GenerationContext {
        GenerationContext {
            store: self.store.clone(),
            engine: self.engine.clone(),
            sessions: self.sessions.clone(),
            snapshots: self.snapshots.clone(),
        }
    }
}
