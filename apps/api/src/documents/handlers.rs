//! Axum route handlers for documents and their version lineage.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::documents::lineage::{next_version, resolve_display_version};
use crate::documents::policy::has_used_free_revision;
use crate::documents::store::Page;
use crate::errors::AppError;
use crate::models::document::{Document, DocumentPatch, DocumentStatus, DocumentType, NewDocument};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

/// A submitted form. Always creates a lineage root with empty content.
#[derive(Debug, Deserialize)]
pub struct CreateDocumentRequest {
    pub user_ref: String,
    pub document_type: DocumentType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub form_data: Value,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub ai_model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListDocumentsQuery {
    pub user_ref: String,
    #[serde(default)]
    pub document_type: Option<DocumentType>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListDocumentsResponse {
    pub documents: Vec<Document>,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct VersionsQuery {
    #[serde(default)]
    pub version_uuid: Option<Uuid>,
    #[serde(default)]
    pub just_created: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct VersionsResponse {
    pub root_uuid: Uuid,
    pub versions: Vec<Document>,
    /// The version the viewer should show.
    pub display: Option<Document>,
    /// UX hint only; the revise endpoint re-checks against storage.
    pub has_used_free_revision: bool,
    pub next_version: i32,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/documents
pub async fn handle_create_document(
    State(state): State<AppState>,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let document = state
        .store
        .create(NewDocument {
            user_ref: request.user_ref,
            document_type: Some(request.document_type),
            title: request.title,
            form_data: request.form_data,
            language: request.language,
            ai_model: request.ai_model,
            ..Default::default()
        })
        .await?;

    info!(
        "Created {} document {} for {}",
        document.document_type, document.uuid, document.user_ref
    );
    Ok((StatusCode::CREATED, Json(document)))
}

/// GET /api/v1/documents?user_ref=&document_type=&page=&limit=
///
/// One entry per lineage (the root), newest first.
pub async fn handle_list_documents(
    State(state): State<AppState>,
    Query(query): Query<ListDocumentsQuery>,
) -> Result<Json<ListDocumentsResponse>, AppError> {
    if query.user_ref.trim().is_empty() {
        return Err(AppError::Validation("user_ref is required".to_string()));
    }
    let page = Page::new(query.page, query.limit);
    let documents = state
        .store
        .find_by_user(&query.user_ref, query.document_type, page)
        .await?;

    Ok(Json(ListDocumentsResponse {
        documents,
        page: page.page,
        limit: page.limit,
    }))
}

/// GET /api/v1/documents/:uuid
pub async fn handle_get_document(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<Document>, AppError> {
    let document = state
        .store
        .find_by_uuid(uuid)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {uuid} not found")))?;
    Ok(Json(document))
}

/// PATCH /api/v1/documents/:uuid
///
/// Status and title only. Content never changes through this endpoint.
pub async fn handle_update_document(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    Json(patch): Json<DocumentPatch>,
) -> Result<Json<Document>, AppError> {
    if patch.is_empty() {
        return Err(AppError::Validation(
            "Nothing to update: provide status or title".to_string(),
        ));
    }
    Ok(Json(state.store.update_metadata(uuid, patch).await?))
}

/// DELETE /api/v1/documents/:uuid
///
/// Logical delete. The row and its lineage stay intact.
pub async fn handle_delete_document(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .store
        .update_metadata(
            uuid,
            DocumentPatch {
                status: Some(DocumentStatus::Deleted),
                title: None,
            },
        )
        .await?;
    info!("Document {uuid} marked deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/documents/:uuid/versions?version_uuid=&just_created=
///
/// `:uuid` may be any version of the lineage.
pub async fn handle_list_versions(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    Query(query): Query<VersionsQuery>,
) -> Result<Json<VersionsResponse>, AppError> {
    let versions = state.lineage().load_for(uuid).await?;
    let root_uuid = versions
        .first()
        .map(Document::root_uuid)
        .unwrap_or(uuid);
    let display =
        resolve_display_version(&versions, query.version_uuid, query.just_created).cloned();

    Ok(Json(VersionsResponse {
        root_uuid,
        has_used_free_revision: has_used_free_revision(&versions),
        next_version: next_version(&versions),
        display,
        versions,
    }))
}
