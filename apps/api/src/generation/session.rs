//! One generation or revision run against a document lineage.
//!
//! `prepare` does every check that can fail before the engine is contacted and
//! claims the lineage's session slot. `run` feeds engine events through the
//! reducer, forwards incremental updates to the caller and performs exactly
//! one commit write when the reducer reaches `Finalizing`.

use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::documents::lineage::{lineage_root, RevisionProvenance, VersionLineageManager};
use crate::documents::policy::{has_used_free_revision, RevisionPolicyGuard, RevisionScope};
use crate::documents::store::{ContentUpdate, DocumentStore};
use crate::documents::word_count::count_words;
use crate::errors::AppError;
use crate::generation::engine::{
    ResponseMode, WorkflowApp, WorkflowEngine, WorkflowKind, WorkflowRequest,
};
use crate::generation::events::{output_text, GenerationEvent};
use crate::generation::inputs::{generation_inputs, revision_inputs};
use crate::generation::paragraphs::splice_paragraph;
use crate::generation::reducer::{
    DisplayState, FailureKind, FinalContent, Phase, Step, StreamEventReducer,
};
use crate::generation::registry::{lock_reducer, SessionLease, SessionRegistry, SharedReducer};
use crate::generation::snapshot::{SessionSnapshot, SnapshotStore};
use crate::models::document::{Document, DocumentStatus, RevisionSettings};

pub const EMPTY_RESULT: &str = "EMPTY_RESULT";

/// Everything a session needs from the application.
#[derive(Clone)]
pub struct GenerationContext {
    pub store: Arc<dyn DocumentStore>,
    pub engine: Arc<dyn WorkflowEngine>,
    pub sessions: SessionRegistry,
    pub snapshots: Arc<dyn SnapshotStore>,
}

impl GenerationContext {
    pub fn lineage(&self) -> VersionLineageManager {
        VersionLineageManager::new(self.store.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionKind {
    /// Fills the root's content from its form data.
    Initial,
    /// Produces the lineage's one revised version.
    Revision {
        scope: RevisionScope,
        settings: RevisionSettings,
    },
}

impl SessionKind {
    pub fn workflow_kind(&self) -> WorkflowKind {
        match self {
            SessionKind::Initial => WorkflowKind::Generate,
            SessionKind::Revision { .. } => WorkflowKind::Revise,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Any version of the lineage; the root is resolved from it.
    pub document_uuid: Uuid,
    pub user: String,
    pub mode: ResponseMode,
    pub kind: SessionKind,
    /// Per-field overrides of the stored form data (initial generation only).
    pub inputs: Option<Map<String, Value>>,
}

/// Incremental updates pushed to the caller while a session runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionUpdate {
    Started {
        workflow_run_id: Option<String>,
        task_id: Option<String>,
    },
    Step {
        label: String,
    },
    LoadingReleased,
    /// Text delta; the caller appends it.
    Chunk {
        text: String,
    },
    Finished {
        state: DisplayState,
    },
}

impl SessionUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            SessionUpdate::Started { .. } => "started",
            SessionUpdate::Step { .. } => "step",
            SessionUpdate::LoadingReleased => "loading_released",
            SessionUpdate::Chunk { .. } => "chunk",
            SessionUpdate::Finished { .. } => "finished",
        }
    }
}

/// Caller side of the update channel. `None` for blocking callers.
struct Updates(Option<mpsc::Sender<SessionUpdate>>);

impl Updates {
    /// False once the receiver is gone.
    async fn send(&self, update: SessionUpdate) -> bool {
        match &self.0 {
            Some(tx) => tx.send(update).await.is_ok(),
            None => true,
        }
    }

    /// Sends in order, stopping at the first undeliverable update.
    async fn send_all(&self, batch: Vec<SessionUpdate>) -> bool {
        for update in batch {
            if !self.send(update).await {
                return false;
            }
        }
        true
    }

    /// Resolves when the receiver is dropped; never for blocking callers.
    async fn closed(&self) {
        match &self.0 {
            Some(tx) => tx.closed().await,
            None => std::future::pending().await,
        }
    }
}

/// Resolves once a stop has been requested, including before the call.
async fn stop_requested(mut stop_rx: watch::Receiver<bool>) {
    if stop_rx.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Policy rejections pass through; any other commit error means the
/// generated text could not be saved.
fn commit_error(err: AppError) -> AppError {
    match err {
        AppError::Permission(_) | AppError::Conflict(_) | AppError::Persistence(_) => err,
        other => AppError::Persistence(other.to_string()),
    }
}

/// Maps a commit error onto the failure reported to the user.
fn commit_failure_kind(err: &AppError) -> FailureKind {
    match err {
        AppError::Permission(_) => FailureKind::Permission,
        AppError::Conflict(_) => FailureKind::Conflict,
        _ => FailureKind::Persistence,
    }
}

pub struct GenerationSession {
    ctx: GenerationContext,
    root: Document,
    kind: SessionKind,
    request: WorkflowRequest,
    reducer: SharedReducer,
    lease: SessionLease,
}

impl GenerationSession {
    pub async fn prepare(ctx: GenerationContext, req: SessionRequest) -> Result<Self, AppError> {
        if req.user.trim().is_empty() {
            return Err(AppError::Validation("user is required".to_string()));
        }

        let manager = ctx.lineage();
        let lineage = manager.load_for(req.document_uuid).await?;
        let root = lineage_root(&lineage)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Document {} not found", req.document_uuid)))?;
        if root.status == DocumentStatus::Deleted {
            return Err(AppError::NotFound(format!("Document {} not found", root.uuid)));
        }

        let inputs = match &req.kind {
            SessionKind::Initial => {
                if has_used_free_revision(&lineage) {
                    return Err(AppError::Conflict(format!(
                        "Document {} has been revised; its original content is frozen",
                        root.uuid
                    )));
                }
                generation_inputs(&root, req.inputs)?
            }
            SessionKind::Revision { scope, settings } => {
                settings.validate()?;
                let fresh = RevisionPolicyGuard::new(&manager).check(root.uuid, *scope).await?;
                let source = lineage_root(&fresh).unwrap_or(&root);
                revision_inputs(&root, source, *scope, settings)?
            }
        };

        let reducer: SharedReducer = Arc::new(Mutex::new(StreamEventReducer::new()));
        let lease = ctx.sessions.register(root.uuid, reducer.clone())?;

        let request = WorkflowRequest {
            app: WorkflowApp {
                document_type: root.document_type,
                kind: req.kind.workflow_kind(),
            },
            inputs,
            response_mode: req.mode,
            user: req.user,
        };

        Ok(Self {
            ctx,
            root,
            kind: req.kind,
            request,
            reducer,
            lease,
        })
    }

    pub fn mode(&self) -> ResponseMode {
        self.request.response_mode
    }

    pub fn view(&self) -> DisplayState {
        lock_reducer(&self.reducer).view()
    }

    /// Runs to a terminal state and returns the final display state. The
    /// snapshot is updated and the session slot released when this returns.
    pub async fn run(self, updates: Option<mpsc::Sender<SessionUpdate>>) -> DisplayState {
        let updates = Updates(updates);
        lock_reducer(&self.reducer).begin();
        info!(
            "Session {} started: {:?} of lineage {} ({:?})",
            self.lease.session_id(),
            self.kind.workflow_kind(),
            self.root.uuid,
            self.request.response_mode
        );

        match self.request.response_mode {
            ResponseMode::Streaming => self.run_streaming(&updates).await,
            ResponseMode::Blocking => self.run_blocking(&updates).await,
        }

        let state = self.view();
        info!(
            "Session {} ended in {:?} for lineage {}",
            self.lease.session_id(),
            state.phase,
            self.root.uuid
        );
        self.save_snapshot(&state).await;
        // A full buffer must not outlive a stop request.
        tokio::select! {
            biased;
            _ = updates.send(SessionUpdate::Finished { state: state.clone() }) => {}
            _ = stop_requested(self.lease.stop_signal()) => {}
        }
        state
    }

    async fn run_streaming(&self, updates: &Updates) {
        let mut stop_rx = self.lease.stop_signal();

        let opened = tokio::select! {
            biased;
            _ = stop_rx.changed() => None,
            _ = updates.closed() => None,
            result = self.ctx.engine.open_stream(&self.request) => Some(result),
        };
        let mut stream = match opened {
            None => return self.stop().await,
            Some(Ok(stream)) => stream,
            Some(Err(e)) => return self.fail(FailureKind::Transport, e.to_string(), None),
        };

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => {
                    self.stop().await;
                    break;
                }
                _ = updates.closed() => {
                    info!("Client of session {} went away; stopping", self.lease.session_id());
                    self.stop().await;
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        if !self.handle_event(event, updates).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        self.fail(FailureKind::Transport, e.to_string(), None);
                        break;
                    }
                    None => {
                        self.fail(
                            FailureKind::Transport,
                            "Event stream closed before the workflow finished".to_string(),
                            None,
                        );
                        break;
                    }
                }
            }
        }
    }

    /// Blocking runs are replayed through the reducer as a started/finished
    /// pair so both modes share one commit path.
    async fn run_blocking(&self, updates: &Updates) {
        let mut stop_rx = self.lease.stop_signal();

        let result = tokio::select! {
            biased;
            _ = stop_rx.changed() => None,
            result = self.ctx.engine.run_blocking(&self.request) => Some(result),
        };
        let result = match result {
            None => return self.stop().await,
            Some(Ok(result)) => result,
            Some(Err(e)) => return self.fail(FailureKind::Transport, e.to_string(), None),
        };

        let finished = match result.error {
            Some(message) => GenerationEvent::Error {
                message,
                code: None,
            },
            None => GenerationEvent::WorkflowFinished {
                outputs: result.outputs,
            },
        };
        let started = GenerationEvent::WorkflowStarted {
            workflow_run_id: result.workflow_run_id.unwrap_or_default(),
            task_id: result.task_id.unwrap_or_default(),
        };

        for event in [started, finished] {
            if !self.handle_event(event, updates).await {
                break;
            }
        }
    }

    /// Applies one event and forwards what changed. False when the session is done.
    async fn handle_event(&self, event: GenerationEvent, updates: &Updates) -> bool {
        let is_started = matches!(event, GenerationEvent::WorkflowStarted { .. });
        let delta = match &event {
            GenerationEvent::NodeStarted { label } if !label.is_empty() => {
                Some(SessionUpdate::Step {
                    label: label.clone(),
                })
            }
            GenerationEvent::TextChunk { text, .. } => Some(SessionUpdate::Chunk { text: text.clone() }),
            _ => None,
        };

        let step = lock_reducer(&self.reducer).apply(event);

        match step {
            Step::Ignored => true,
            Step::Continue | Step::LoadingReleased => {
                let mut batch = Vec::new();
                if is_started {
                    let reducer = lock_reducer(&self.reducer);
                    batch.push(SessionUpdate::Started {
                        workflow_run_id: reducer.workflow_run_id().map(String::from),
                        task_id: reducer.task_id().map(String::from),
                    });
                }
                if step == Step::LoadingReleased {
                    batch.push(SessionUpdate::LoadingReleased);
                }
                batch.extend(delta);

                // A slow reader blocks the send; a stop must still get through.
                let delivered = tokio::select! {
                    biased;
                    delivered = updates.send_all(batch) => delivered,
                    _ = stop_requested(self.lease.stop_signal()) => {
                        self.stop().await;
                        return false;
                    }
                };
                if !delivered {
                    info!("Client of session {} went away; stopping", self.lease.session_id());
                    self.stop().await;
                    return false;
                }
                true
            }
            Step::Finalize(content) => {
                self.finalize(content).await;
                false
            }
            Step::Terminated => {
                let state = self.view();
                if let Some(failure) = state.failure {
                    warn!(
                        "Workflow for lineage {} failed: {}",
                        self.root.uuid, failure.message
                    );
                }
                false
            }
        }
    }

    async fn finalize(&self, content: FinalContent) {
        let text = match content {
            FinalContent::Text(text) => text,
            FinalContent::Empty => match self.recover_empty().await {
                Some(text) => text,
                None => {
                    warn!(
                        "Workflow for lineage {} finished without content; nothing committed",
                        self.root.uuid
                    );
                    return self.fail(
                        FailureKind::EmptyResult,
                        "The workflow finished without producing any content".to_string(),
                        Some(EMPTY_RESULT.to_string()),
                    );
                }
            },
        };

        match self.commit(text).await.map_err(commit_error) {
            Ok(document) => {
                lock_reducer(&self.reducer).mark_committed(document.uuid);
                info!(
                    "Committed {} (v{}) for lineage {}",
                    document.uuid, document.version, self.root.uuid
                );
            }
            Err(e) => {
                let kind = commit_failure_kind(&e);
                if kind == FailureKind::Persistence {
                    error!("Commit for lineage {} failed: {e}", self.root.uuid);
                } else {
                    warn!("Commit for lineage {} rejected: {e}", self.root.uuid);
                }
                self.fail(kind, e.to_string(), Some(e.code().to_string()));
            }
        }
    }

    /// One lookup of the finished run's outputs. Streaming only: a blocking
    /// response already carried them.
    async fn recover_empty(&self) -> Option<String> {
        if self.request.response_mode != ResponseMode::Streaming {
            return None;
        }
        let run_id = lock_reducer(&self.reducer)
            .workflow_run_id()
            .map(String::from)?;

        match self.ctx.engine.fetch_run(self.request.app, &run_id).await {
            Ok(Some(outputs)) => {
                let text = output_text(&outputs)?.to_string();
                match lock_reducer(&self.reducer).recover_empty(text) {
                    FinalContent::Text(text) => Some(text),
                    FinalContent::Empty => None,
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Looking up outputs of run {run_id} failed: {e}");
                None
            }
        }
    }

    /// Keeps an unsaved draft restorable; a commit clears it. Runs while the
    /// lease is held so a later session's snapshot cannot be overwritten.
    async fn save_snapshot(&self, state: &DisplayState) {
        let root_uuid = self.root.uuid;
        let result = match state.phase {
            Phase::Committed => self.ctx.snapshots.clear(root_uuid).await,
            Phase::Failed | Phase::Stopped => {
                let snapshot =
                    SessionSnapshot::capture(root_uuid, self.kind.workflow_kind(), state.clone());
                self.ctx.snapshots.persist(&snapshot).await
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("Snapshot update for lineage {root_uuid} failed: {e}");
        }
    }

    /// The single write of a session.
    async fn commit(&self, text: String) -> Result<Document, AppError> {
        let workflow_run_id = lock_reducer(&self.reducer)
            .workflow_run_id()
            .map(String::from);

        match &self.kind {
            SessionKind::Initial => {
                self.ctx
                    .store
                    .update_content(
                        self.root.uuid,
                        ContentUpdate {
                            word_count: count_words(&text),
                            content: text,
                            workflow_run_id,
                        },
                    )
                    .await
            }
            SessionKind::Revision { scope, settings } => {
                let manager = self.ctx.lineage();
                let lineage = RevisionPolicyGuard::new(&manager)
                    .check(self.root.uuid, *scope)
                    .await?;
                let source = lineage_root(&lineage).ok_or_else(|| {
                    AppError::NotFound(format!("Document lineage {} not found", self.root.uuid))
                })?;

                let content = match scope {
                    RevisionScope::Document => text,
                    RevisionScope::Paragraph { index } => {
                        splice_paragraph(&source.content, *index, &text)?
                    }
                };
                let provenance = RevisionProvenance {
                    workflow_run_id,
                    generation_params: Some(json!({
                        "scope": scope,
                        "response_mode": self.request.response_mode,
                        "user": self.request.user,
                    })),
                };
                manager
                    .create_revision(self.root.uuid, content, settings.clone(), provenance)
                    .await
            }
        }
    }

    /// → Stopped, plus a best-effort upstream cancel when the task is known.
    async fn stop(&self) {
        let task_id = {
            let mut reducer = lock_reducer(&self.reducer);
            if !reducer.stop() {
                return;
            }
            reducer.task_id().map(String::from)
        };
        info!("Session {} stopped", self.lease.session_id());

        if let Some(task_id) = task_id {
            if let Err(e) = self
                .ctx
                .engine
                .stop_task(self.request.app, &task_id, &self.request.user)
                .await
            {
                warn!("Upstream stop of task {task_id} failed: {e}");
            }
        }
    }

    fn fail(&self, kind: FailureKind, message: String, code: Option<String>) {
        lock_reducer(&self.reducer).fail(kind, message, code);
    }
}
