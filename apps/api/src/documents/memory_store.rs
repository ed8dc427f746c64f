//! In-process `DocumentStore`. Selected with `STORAGE_BACKEND=memory` and used
//! by the test suites. Enforces the same uniqueness rules as the Postgres schema,
//! all under one lock so check-and-insert is atomic.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::documents::store::{ContentUpdate, DocumentStore, Page};
use crate::errors::AppError;
use crate::models::document::{
    Document, DocumentPatch, DocumentStatus, DocumentType, NewDocument, VersionType,
};

#[derive(Default)]
pub struct InMemoryDocumentStore {
    rows: Mutex<HashMap<Uuid, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, Document>>, AppError> {
        self.rows
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("document store lock poisoned")))
    }
}

/// Mirrors the unique indexes of the `documents` table.
fn check_constraints(rows: &HashMap<Uuid, Document>, doc: &Document) -> Result<(), AppError> {
    if rows.contains_key(&doc.uuid) {
        return Err(AppError::Conflict(format!(
            "document {} already exists",
            doc.uuid
        )));
    }

    let root = doc.root_uuid();
    if let Some(parent) = doc.parent_document_uuid {
        match rows.get(&parent) {
            Some(p) if p.is_root() => {}
            Some(_) => {
                return Err(AppError::Validation(format!(
                    "parent {parent} is not a lineage root"
                )))
            }
            None => return Err(AppError::NotFound(format!("Document {parent} not found"))),
        }
    }
    for existing in rows.values().filter(|d| d.root_uuid() == root) {
        if existing.version == doc.version {
            return Err(AppError::Conflict(format!(
                "version {} already exists in lineage {root}",
                doc.version
            )));
        }
        if doc.version_type == VersionType::Revised && existing.version_type == VersionType::Revised
        {
            return Err(AppError::Conflict(format!(
                "lineage {root} already has its free revision"
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create(&self, doc: NewDocument) -> Result<Document, AppError> {
        let doc = doc.into_document(Utc::now())?;
        let mut rows = self.lock()?;
        check_constraints(&rows, &doc)?;
        rows.insert(doc.uuid, doc.clone());
        Ok(doc)
    }

    async fn update_content(
        &self,
        uuid: Uuid,
        update: ContentUpdate,
    ) -> Result<Document, AppError> {
        let mut rows = self.lock()?;
        let has_revision = rows
            .values()
            .any(|d| d.parent_document_uuid == Some(uuid) && d.version_type == VersionType::Revised);

        let doc = rows
            .get_mut(&uuid)
            .ok_or_else(|| AppError::NotFound(format!("Document {uuid} not found")))?;
        if !doc.is_root() || has_revision {
            return Err(AppError::Conflict(format!(
                "content of document {uuid} is frozen; create a revision instead"
            )));
        }

        doc.content = update.content;
        doc.word_count = update.word_count;
        if update.workflow_run_id.is_some() {
            doc.workflow_run_id = update.workflow_run_id;
        }
        doc.updated_at = Utc::now();
        Ok(doc.clone())
    }

    async fn update_metadata(
        &self,
        uuid: Uuid,
        patch: DocumentPatch,
    ) -> Result<Document, AppError> {
        let mut rows = self.lock()?;
        let doc = rows
            .get_mut(&uuid)
            .ok_or_else(|| AppError::NotFound(format!("Document {uuid} not found")))?;
        if let Some(status) = patch.status {
            doc.status = status;
        }
        if let Some(title) = patch.title {
            doc.title = Some(title);
        }
        doc.updated_at = Utc::now();
        Ok(doc.clone())
    }

    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Document>, AppError> {
        Ok(self.lock()?.get(&uuid).cloned())
    }

    async fn find_lineage(&self, root_uuid: Uuid) -> Result<Vec<Document>, AppError> {
        let rows = self.lock()?;
        let mut lineage: Vec<Document> = rows
            .values()
            .filter(|d| d.uuid == root_uuid || d.parent_document_uuid == Some(root_uuid))
            .cloned()
            .collect();
        lineage.sort_by_key(|d| d.version);
        Ok(lineage)
    }

    async fn find_by_user(
        &self,
        user_ref: &str,
        document_type: Option<DocumentType>,
        page: Page,
    ) -> Result<Vec<Document>, AppError> {
        let rows = self.lock()?;
        let mut roots: Vec<Document> = rows
            .values()
            .filter(|d| {
                d.user_ref == user_ref
                    && d.parent_document_uuid.is_none()
                    && d.status == DocumentStatus::Active
                    && document_type.map_or(true, |t| d.document_type == t)
            })
            .cloned()
            .collect();
        roots.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.uuid.cmp(&a.uuid)));
        Ok(roots
            .into_iter()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(page.limit as usize)
            .collect())
    }
}
