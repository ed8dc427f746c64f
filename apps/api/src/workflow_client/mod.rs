/// Workflow client: the single point of entry for all calls to the external
/// AI workflow engine.
///
/// ARCHITECTURAL RULE: No other module may call the engine's HTTP API directly.
/// Everything goes through `WorkflowClient` via the `WorkflowEngine` trait.
///
/// Run endpoints (`/workflows/run`) are never retried: every run is metered.
/// Only the idempotent run lookup is retried with backoff.
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::generation::engine::{
    BlockingResult, EventStream, ResponseMode, WorkflowApp, WorkflowEngine, WorkflowKind,
    WorkflowRequest,
};
use crate::generation::events::GenerationEvent;
use crate::models::document::DocumentType;

pub mod sse;

use sse::SseDecoder;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const MAX_LOOKUP_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Malformed event frame: {0}")]
    MalformedFrame(String),

    #[error("Lookup failed after {retries} retries")]
    RetriesExhausted { retries: u32 },
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        AppError::Transport(err.to_string())
    }
}

/// API keys per engine app. Each document type may run its own workflow app;
/// revisions may use a dedicated one.
#[derive(Debug, Clone)]
pub struct WorkflowKeys {
    pub default: String,
    pub per_type: HashMap<DocumentType, String>,
    pub revision: Option<String>,
}

impl WorkflowKeys {
    pub fn key_for(&self, app: WorkflowApp) -> &str {
        let typed = self.per_type.get(&app.document_type);
        let key = match app.kind {
            WorkflowKind::Revise => self.revision.as_ref().or(typed),
            WorkflowKind::Generate => typed,
        };
        key.map(String::as_str).unwrap_or(self.default.as_str())
    }
}

#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    inputs: &'a Map<String, Value>,
    response_mode: ResponseMode,
    user: &'a str,
}

#[derive(Debug, Serialize)]
struct StopRequest<'a> {
    user: &'a str,
}

/// Blocking responses come in two shapes: flat `{workflow_run_id, outputs}` or
/// nested `{workflow_run_id, task_id, data: {outputs, status, error}}`.
#[derive(Debug, Default, Deserialize)]
struct BlockingResponse {
    #[serde(default)]
    workflow_run_id: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    outputs: Option<Value>,
    #[serde(default)]
    data: Option<RunData>,
}

#[derive(Debug, Default, Deserialize)]
struct RunData {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    outputs: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl RunData {
    fn failure(&self) -> Option<String> {
        match self.status.as_deref() {
            Some(status @ ("failed" | "stopped")) => Some(
                self.error
                    .clone()
                    .unwrap_or_else(|| format!("workflow {status}")),
            ),
            _ => None,
        }
    }
}

impl From<BlockingResponse> for BlockingResult {
    fn from(response: BlockingResponse) -> Self {
        let data = response.data.unwrap_or_default();
        let error = data.failure();
        BlockingResult {
            workflow_run_id: response.workflow_run_id.or(data.id),
            task_id: response.task_id,
            outputs: normalize_outputs(response.outputs.or(data.outputs)),
            error,
        }
    }
}

/// Some engine versions return `outputs` as a JSON-encoded string.
fn normalize_outputs(outputs: Option<Value>) -> Value {
    match outputs {
        Some(Value::String(raw)) => {
            serde_json::from_str(&raw).unwrap_or_else(|_| serde_json::json!({ "text": raw }))
        }
        Some(value) => value,
        None => Value::Null,
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

/// HTTP client for the workflow engine.
#[derive(Clone)]
pub struct WorkflowClient {
    client: Client,
    base_url: String,
    keys: WorkflowKeys,
    blocking_timeout: Duration,
}

impl WorkflowClient {
    pub fn new(
        base_url: String,
        keys: WorkflowKeys,
        blocking_timeout: Duration,
    ) -> Result<Self, WorkflowError> {
        // No overall timeout on the client: streaming runs stay open for minutes.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            keys,
            blocking_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_run(&self, request: &WorkflowRequest) -> Result<reqwest::Response, WorkflowError> {
        let body = RunRequest {
            inputs: &request.inputs,
            response_mode: request.response_mode,
            user: &request.user,
        };

        let mut builder = self
            .client
            .post(self.url("/workflows/run"))
            .bearer_auth(self.keys.key_for(request.app))
            .json(&body);
        if request.response_mode == ResponseMode::Blocking {
            builder = builder.timeout(self.blocking_timeout);
        }

        let response = builder.send().await?;
        check_status(response).await
    }
}

/// Turns non-2xx responses into `WorkflowError::Api`, keeping the engine's message.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, WorkflowError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|e| match e.code {
            Some(code) => format!("{code}: {}", e.message),
            None => e.message,
        })
        .unwrap_or(body);
    Err(WorkflowError::Api {
        status: status.as_u16(),
        message,
    })
}

struct DecodeState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: SseDecoder,
    pending: VecDeque<GenerationEvent>,
    done: bool,
}

/// Adapts a raw byte stream into ordered `GenerationEvent`s. Ends after the first error.
fn decode_events(body: BoxStream<'static, reqwest::Result<Bytes>>) -> EventStream {
    let state = DecodeState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            if st.done {
                return None;
            }
            let decoded = match st.body.next().await {
                Some(Ok(chunk)) => st.decoder.push(&chunk),
                Some(Err(e)) => Err(WorkflowError::Http(e)),
                None => {
                    st.done = true;
                    st.decoder.finish()
                }
            };
            match decoded {
                Ok(events) => st.pending.extend(events),
                Err(e) => {
                    st.done = true;
                    st.pending.clear();
                    return Some((Err(AppError::from(e)), st));
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl WorkflowEngine for WorkflowClient {
    async fn open_stream(&self, request: &WorkflowRequest) -> Result<EventStream, AppError> {
        let response = self.post_run(request).await?;
        info!(
            "Opened workflow stream for {} ({:?})",
            request.app.document_type, request.app.kind
        );
        Ok(decode_events(response.bytes_stream().boxed()))
    }

    async fn run_blocking(&self, request: &WorkflowRequest) -> Result<BlockingResult, AppError> {
        let response = self.post_run(request).await?;
        let parsed: BlockingResponse = response.json().await.map_err(WorkflowError::Http)?;
        let result = BlockingResult::from(parsed);
        debug!(
            "Blocking workflow run finished: run_id={:?}",
            result.workflow_run_id
        );
        Ok(result)
    }

    /// Retries on 429 (rate limit) and 5xx errors with exponential backoff.
    async fn fetch_run(
        &self,
        app: WorkflowApp,
        workflow_run_id: &str,
    ) -> Result<Option<Value>, AppError> {
        let url = self.url(&format!("/workflows/run/{workflow_run_id}"));
        let mut last_error: Option<WorkflowError> = None;

        for attempt in 0..MAX_LOOKUP_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 500ms, 1s, 2s
                let delay = Duration::from_millis(500 * (1 << (attempt - 1)));
                warn!(
                    "Run lookup attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .get(&url)
                .bearer_auth(self.keys.key_for(app))
                .timeout(self.blocking_timeout)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(WorkflowError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = Some(WorkflowError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            let response = check_status(response).await?;
            let run: RunData = response.json().await.map_err(WorkflowError::Http)?;
            if run.failure().is_some() {
                return Ok(None);
            }
            let outputs = normalize_outputs(run.outputs);
            return Ok((!outputs.is_null()).then_some(outputs));
        }

        Err(last_error
            .unwrap_or(WorkflowError::RetriesExhausted {
                retries: MAX_LOOKUP_RETRIES,
            })
            .into())
    }

    async fn stop_task(&self, app: WorkflowApp, task_id: &str, user: &str) -> Result<(), AppError> {
        let response = self
            .client
            .post(self.url(&format!("/workflows/tasks/{task_id}/stop")))
            .bearer_auth(self.keys.key_for(app))
            .json(&StopRequest { user })
            .timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .send()
            .await
            .map_err(WorkflowError::Http)?;
        check_status(response).await?;
        info!("Requested upstream stop of task {task_id}");
        Ok(())
    }
}
