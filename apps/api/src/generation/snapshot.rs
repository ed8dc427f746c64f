//! Snapshots of a session's final display state, so an unsaved draft survives
//! the client going away and can be restored later.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::generation::engine::WorkflowKind;
use crate::generation::reducer::DisplayState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub root_uuid: Uuid,
    pub kind: WorkflowKind,
    pub state: DisplayState,
    pub saved_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn capture(root_uuid: Uuid, kind: WorkflowKind, state: DisplayState) -> Self {
        Self {
            root_uuid,
            kind,
            state,
            saved_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn persist(&self, snapshot: &SessionSnapshot) -> Result<(), AppError>;

    async fn restore(&self, root_uuid: Uuid) -> Result<Option<SessionSnapshot>, AppError>;

    async fn clear(&self, root_uuid: Uuid) -> Result<(), AppError>;
}

fn snapshot_key(root_uuid: Uuid) -> String {
    format!("appdocs:generation:{root_uuid}")
}

/// Redis-backed snapshots with a TTL.
pub struct RedisSnapshotStore {
    client: redis::Client,
    ttl_secs: u64,
}

impl RedisSnapshotStore {
    pub fn new(client: redis::Client, ttl_secs: u64) -> Self {
        Self { client, ttl_secs }
    }
}

#[async_trait]
impl SnapshotStore for RedisSnapshotStore {
    async fn persist(&self, snapshot: &SessionSnapshot) -> Result<(), AppError> {
        let payload = serde_json::to_string(snapshot)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("snapshot encode failed: {e}")))?;
        let mut con = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("SET")
            .arg(snapshot_key(snapshot.root_uuid))
            .arg(payload)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async::<_, ()>(&mut con)
            .await?;
        Ok(())
    }

    async fn restore(&self, root_uuid: Uuid) -> Result<Option<SessionSnapshot>, AppError> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = redis::cmd("GET")
            .arg(snapshot_key(root_uuid))
            .query_async(&mut con)
            .await?;

        match payload {
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                AppError::Internal(anyhow::anyhow!(
                    "snapshot for {root_uuid} is unreadable: {e}"
                ))
            }),
            None => Ok(None),
        }
    }

    async fn clear(&self, root_uuid: Uuid) -> Result<(), AppError> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("DEL")
            .arg(snapshot_key(root_uuid))
            .query_async::<_, ()>(&mut con)
            .await?;
        Ok(())
    }
}

/// Process-local snapshots, used when no Redis URL is configured and in tests.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<HashMap<Uuid, SessionSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshots(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SessionSnapshot>> {
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn persist(&self, snapshot: &SessionSnapshot) -> Result<(), AppError> {
        self.snapshots()
            .insert(snapshot.root_uuid, snapshot.clone());
        Ok(())
    }

    async fn restore(&self, root_uuid: Uuid) -> Result<Option<SessionSnapshot>, AppError> {
        Ok(self.snapshots().get(&root_uuid).cloned())
    }

    async fn clear(&self, root_uuid: Uuid) -> Result<(), AppError> {
        self.snapshots().remove(&root_uuid);
        Ok(())
    }
}
