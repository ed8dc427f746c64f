//! Axum route handlers for the Generation API.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::{DateTime, Utc};
use futures_util::stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::documents::policy::RevisionScope;
use crate::errors::AppError;
use crate::generation::engine::ResponseMode;
use crate::generation::reducer::DisplayState;
use crate::generation::session::{GenerationSession, SessionKind, SessionRequest, SessionUpdate};
use crate::models::document::RevisionSettings;
use crate::state::AppState;

/// Updates buffered between the session task and the SSE response.
const UPDATE_BUFFER: usize = 64;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub user: String,
    #[serde(default)]
    pub mode: ResponseMode,
    /// Per-field overrides of the stored form data.
    #[serde(default)]
    pub inputs: Option<Map<String, Value>>,
}

/// `{"user": "...", "scope": "paragraph", "index": 2, "settings": {...}}`
#[derive(Debug, Deserialize)]
pub struct ReviseRequest {
    pub user: String,
    #[serde(default)]
    pub mode: ResponseMode,
    #[serde(flatten)]
    pub scope: RevisionScope,
    #[serde(default)]
    pub settings: RevisionSettings,
}

#[derive(Debug, Serialize)]
pub struct GenerationStatusResponse {
    pub root_uuid: Uuid,
    /// True while a session is running; `state` is then live.
    pub active: bool,
    pub state: Option<DisplayState>,
    /// Set when `state` was restored from a snapshot.
    pub saved_at: Option<DateTime<Utc>>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/documents/:uuid/generate
///
/// Fills the lineage root from its form data. Streams `SessionUpdate`s as SSE,
/// or returns the final display state when `mode` is `blocking`.
pub async fn handle_generate(
    State(state): State<AppState>,
    Path(document_uuid): Path<Uuid>,
    Json(request): Json<GenerateRequest>,
) -> Result<Response, AppError> {
    let session = GenerationSession::prepare(
        state.generation(),
        SessionRequest {
            document_uuid,
            user: request.user,
            mode: request.mode,
            kind: SessionKind::Initial,
            inputs: request.inputs,
        },
    )
    .await?;

    Ok(start_session(session).await)
}

/// POST /api/v1/documents/:uuid/revise
///
/// Produces the lineage's one free revision, whole-document or one paragraph.
pub async fn handle_revise(
    State(state): State<AppState>,
    Path(document_uuid): Path<Uuid>,
    Json(request): Json<ReviseRequest>,
) -> Result<Response, AppError> {
    let session = GenerationSession::prepare(
        state.generation(),
        SessionRequest {
            document_uuid,
            user: request.user,
            mode: request.mode,
            kind: SessionKind::Revision {
                scope: request.scope,
                settings: request.settings,
            },
            inputs: None,
        },
    )
    .await?;

    Ok(start_session(session).await)
}

/// GET /api/v1/documents/:uuid/generation
///
/// Live state of the running session, or the last unsaved draft snapshot.
pub async fn handle_generation_status(
    State(state): State<AppState>,
    Path(document_uuid): Path<Uuid>,
) -> Result<Json<GenerationStatusResponse>, AppError> {
    let root_uuid = resolve_root(&state, document_uuid).await?;

    if let Some(live) = state.sessions.view(root_uuid) {
        return Ok(Json(GenerationStatusResponse {
            root_uuid,
            active: true,
            state: Some(live),
            saved_at: None,
        }));
    }

    let snapshot = state.snapshots.restore(root_uuid).await?;
    Ok(Json(GenerationStatusResponse {
        root_uuid,
        active: false,
        saved_at: snapshot.as_ref().map(|s| s.saved_at),
        state: snapshot.map(|s| s.state),
    }))
}

/// POST /api/v1/documents/:uuid/generation/stop
///
/// Cooperative stop. The session winds down on its own task; nothing is committed.
pub async fn handle_stop_generation(
    State(state): State<AppState>,
    Path(document_uuid): Path<Uuid>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let root_uuid = resolve_root(&state, document_uuid).await?;
    if !state.sessions.stop(root_uuid) {
        return Err(AppError::NotFound(format!(
            "No generation session is running for document {root_uuid}"
        )));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "root_uuid": root_uuid, "stopping": true })),
    ))
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

async fn resolve_root(state: &AppState, document_uuid: Uuid) -> Result<Uuid, AppError> {
    state
        .store
        .find_by_uuid(document_uuid)
        .await?
        .map(|doc| doc.root_uuid())
        .ok_or_else(|| AppError::NotFound(format!("Document {document_uuid} not found")))
}

async fn start_session(session: GenerationSession) -> Response {
    match session.mode() {
        ResponseMode::Blocking => Json(session.run(None).await).into_response(),
        ResponseMode::Streaming => {
            let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
            tokio::spawn(async move {
                session.run(Some(tx)).await;
            });

            let events = stream::unfold(rx, |mut rx| async move {
                let update = rx.recv().await?;
                Some((Ok::<_, Infallible>(to_sse_event(&update)), rx))
            });
            Sse::new(events)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
    }
}

fn to_sse_event(update: &SessionUpdate) -> Event {
    Event::default()
        .event(update.name())
        .json_data(update)
        .unwrap_or_else(|e| {
            warn!("Failed to encode session update: {e}");
            Event::default()
                .event("error")
                .data("session update could not be encoded")
        })
}
