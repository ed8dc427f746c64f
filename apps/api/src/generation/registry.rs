//! Tracks live generation sessions, one per lineage root.
//!
//! Registering hands back a `SessionLease`; dropping the lease frees the slot,
//! so every exit path of a session (commit, failure, stop, panic) releases it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::errors::AppError;
use crate::generation::reducer::{DisplayState, StreamEventReducer};

pub type SharedReducer = Arc<Mutex<StreamEventReducer>>;

/// Locks a reducer, recovering the state if a previous holder panicked.
pub fn lock_reducer(reducer: &SharedReducer) -> MutexGuard<'_, StreamEventReducer> {
    reducer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct ActiveSession {
    session_id: Uuid,
    stop: watch::Sender<bool>,
    reducer: SharedReducer,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashMap<Uuid, ActiveSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<Uuid, ActiveSession>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claims the slot for `root_uuid`. Fails with `Conflict` while another
    /// session for the same lineage is running.
    pub fn register(&self, root_uuid: Uuid, reducer: SharedReducer) -> Result<SessionLease, AppError> {
        let mut sessions = self.sessions();
        if sessions.contains_key(&root_uuid) {
            return Err(AppError::Conflict(format!(
                "A generation session is already running for document {root_uuid}"
            )));
        }

        let session_id = Uuid::new_v4();
        let (stop, stop_rx) = watch::channel(false);
        sessions.insert(
            root_uuid,
            ActiveSession {
                session_id,
                stop,
                reducer,
            },
        );
        debug!("Registered session {session_id} for lineage {root_uuid}");

        Ok(SessionLease {
            root_uuid,
            session_id,
            registry: self.clone(),
            stop_rx,
        })
    }

    /// Signals the session for `root_uuid` to stop. False if none is running.
    pub fn stop(&self, root_uuid: Uuid) -> bool {
        match self.sessions().get(&root_uuid) {
            Some(session) => {
                session.stop.send_replace(true);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn is_active(&self, root_uuid: Uuid) -> bool {
        self.sessions().contains_key(&root_uuid)
    }

    /// Current display state of the running session, if any.
    pub fn view(&self, root_uuid: Uuid) -> Option<DisplayState> {
        let reducer = self.sessions().get(&root_uuid)?.reducer.clone();
        let view = lock_reducer(&reducer).view();
        Some(view)
    }

    fn release(&self, root_uuid: Uuid, session_id: Uuid) {
        let mut sessions = self.sessions();
        if sessions
            .get(&root_uuid)
            .is_some_and(|s| s.session_id == session_id)
        {
            sessions.remove(&root_uuid);
            debug!("Released session {session_id} for lineage {root_uuid}");
        }
    }
}

pub struct SessionLease {
    root_uuid: Uuid,
    session_id: Uuid,
    registry: SessionRegistry,
    stop_rx: watch::Receiver<bool>,
}

impl SessionLease {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// A receiver that changes to `true` once a stop is requested.
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    #[cfg(test)]
    pub fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.registry.release(self.root_uuid, self.session_id);
    }
}
