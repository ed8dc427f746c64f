//! In-process stand-ins for the workflow engine, a store whose content
//! writes fail and a snapshot store that records session liveness.
//! Test builds only.

use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::documents::memory_store::InMemoryDocumentStore;
use crate::documents::store::{ContentUpdate, DocumentStore, Page};
use crate::errors::AppError;
use crate::generation::engine::{
    BlockingResult, EventStream, WorkflowApp, WorkflowEngine, WorkflowRequest,
};
use crate::generation::events::GenerationEvent;
use crate::generation::registry::SessionRegistry;
use crate::generation::snapshot::{InMemorySnapshotStore, SessionSnapshot, SnapshotStore};
use crate::models::document::{Document, DocumentPatch, DocumentType, NewDocument};

#[derive(Debug, Clone)]
pub enum Scripted {
    Event(GenerationEvent),
    /// Transport failure mid-stream.
    Fail(String),
}

pub fn started() -> Scripted {
    Scripted::Event(GenerationEvent::WorkflowStarted {
        workflow_run_id: "run-1".to_string(),
        task_id: "task-1".to_string(),
    })
}

pub fn chunk(text: &str, is_first: bool) -> Scripted {
    Scripted::Event(GenerationEvent::TextChunk {
        text: text.to_string(),
        is_first,
    })
}

pub fn finished(outputs: Value) -> Scripted {
    Scripted::Event(GenerationEvent::WorkflowFinished { outputs })
}

/// Replays a fixed script and records every call it receives.
#[derive(Default)]
pub struct ScriptedEngine {
    script: Vec<Scripted>,
    /// Keep the stream open after the script instead of ending it.
    hang: bool,
    blocking_outputs: Option<Value>,
    fetched: Option<Value>,
    requests: Mutex<Vec<WorkflowRequest>>,
    fetch_calls: Mutex<Vec<String>>,
    stop_calls: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn streaming(script: Vec<Scripted>) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    pub fn blocking(outputs: Value) -> Self {
        Self {
            blocking_outputs: Some(outputs),
            ..Default::default()
        }
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn with_fetched(mut self, outputs: Value) -> Self {
        self.fetched = Some(outputs);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<WorkflowRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn fetch_calls(&self) -> Vec<String> {
        self.fetch_calls.lock().unwrap().clone()
    }

    pub fn stop_calls(&self) -> Vec<String> {
        self.stop_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkflowEngine for ScriptedEngine {
    async fn open_stream(&self, request: &WorkflowRequest) -> Result<EventStream, AppError> {
        self.requests.lock().unwrap().push(request.clone());
        let items: Vec<Result<GenerationEvent, AppError>> = self
            .script
            .iter()
            .cloned()
            .map(|item| match item {
                Scripted::Event(event) => Ok(event),
                Scripted::Fail(message) => Err(AppError::Transport(message)),
            })
            .collect();

        let scripted = stream::iter(items);
        if self.hang {
            Ok(scripted.chain(stream::pending()).boxed())
        } else {
            Ok(scripted.boxed())
        }
    }

    async fn run_blocking(&self, request: &WorkflowRequest) -> Result<BlockingResult, AppError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(BlockingResult {
            workflow_run_id: Some("run-1".to_string()),
            task_id: Some("task-1".to_string()),
            outputs: self.blocking_outputs.clone().unwrap_or_else(|| json!({})),
            error: None,
        })
    }

    async fn fetch_run(
        &self,
        _app: WorkflowApp,
        workflow_run_id: &str,
    ) -> Result<Option<Value>, AppError> {
        self.fetch_calls
            .lock()
            .unwrap()
            .push(workflow_run_id.to_string());
        Ok(self.fetched.clone())
    }

    async fn stop_task(&self, _app: WorkflowApp, task_id: &str, _user: &str) -> Result<(), AppError> {
        self.stop_calls.lock().unwrap().push(task_id.to_string());
        Ok(())
    }
}

/// In-memory store whose content write-back always fails.
#[derive(Default)]
pub struct BrokenContentStore {
    inner: InMemoryDocumentStore,
}

#[async_trait]
impl DocumentStore for BrokenContentStore {
    async fn create(&self, doc: NewDocument) -> Result<Document, AppError> {
        self.inner.create(doc).await
    }

    async fn update_content(&self, _uuid: Uuid, _update: ContentUpdate) -> Result<Document, AppError> {
        Err(AppError::Internal(anyhow::anyhow!("connection reset during write")))
    }

    async fn update_metadata(&self, uuid: Uuid, patch: DocumentPatch) -> Result<Document, AppError> {
        self.inner.update_metadata(uuid, patch).await
    }

    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Document>, AppError> {
        self.inner.find_by_uuid(uuid).await
    }

    async fn find_lineage(&self, root_uuid: Uuid) -> Result<Vec<Document>, AppError> {
        self.inner.find_lineage(root_uuid).await
    }

    async fn find_by_user(
        &self,
        user_ref: &str,
        document_type: Option<DocumentType>,
        page: Page,
    ) -> Result<Vec<Document>, AppError> {
        self.inner.find_by_user(user_ref, document_type, page).await
    }
}

/// Snapshot store that notes, on every write, whether the lineage's session
/// slot was still held.
pub struct LeaseCheckingSnapshots {
    sessions: SessionRegistry,
    inner: InMemorySnapshotStore,
    held: Mutex<Vec<bool>>,
}

impl LeaseCheckingSnapshots {
    pub fn new(sessions: SessionRegistry) -> Self {
        Self {
            sessions,
            inner: InMemorySnapshotStore::new(),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn held_on_write(&self) -> Vec<bool> {
        self.held.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotStore for LeaseCheckingSnapshots {
    async fn persist(&self, snapshot: &SessionSnapshot) -> Result<(), AppError> {
        let held = self.sessions.is_active(snapshot.root_uuid);
        self.held.lock().unwrap().push(held);
        self.inner.persist(snapshot).await
    }

    async fn restore(&self, root_uuid: Uuid) -> Result<Option<SessionSnapshot>, AppError> {
        self.inner.restore(root_uuid).await
    }

    async fn clear(&self, root_uuid: Uuid) -> Result<(), AppError> {
        let held = self.sessions.is_active(root_uuid);
        self.held.lock().unwrap().push(held);
        self.inner.clear(root_uuid).await
    }
}
