//! The workflow engine seam. `WorkflowClient` talks HTTP to the real engine;
//! tests plug in a scripted engine.
//!
//! Carried in `AppState` as `Arc<dyn WorkflowEngine>`.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::AppError;
use crate::generation::events::GenerationEvent;
use crate::models::document::DocumentType;

pub type EventStream = BoxStream<'static, Result<GenerationEvent, AppError>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    #[default]
    Streaming,
    Blocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Generate,
    Revise,
}

/// Which engine app a call targets. Stop and run lookups must reuse the
/// app that started the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowApp {
    pub document_type: DocumentType,
    pub kind: WorkflowKind,
}

#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    pub app: WorkflowApp,
    pub inputs: Map<String, Value>,
    pub response_mode: ResponseMode,
    pub user: String,
}

/// Result of a blocking run, normalised across response shapes.
#[derive(Debug, Clone, Default)]
pub struct BlockingResult {
    pub workflow_run_id: Option<String>,
    pub task_id: Option<String>,
    pub outputs: Value,
    /// Set when the engine reports the run itself as failed.
    pub error: Option<String>,
}

#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Opens the ordered event channel for a streaming run.
    async fn open_stream(&self, request: &WorkflowRequest) -> Result<EventStream, AppError>;

    async fn run_blocking(&self, request: &WorkflowRequest) -> Result<BlockingResult, AppError>;

    /// Looks up the outputs of a finished run. `None` if the run has no outputs.
    async fn fetch_run(&self, app: WorkflowApp, workflow_run_id: &str)
        -> Result<Option<Value>, AppError>;

    /// Best-effort upstream cancel.
    async fn stop_task(&self, app: WorkflowApp, task_id: &str, user: &str)
        -> Result<(), AppError>;
}
