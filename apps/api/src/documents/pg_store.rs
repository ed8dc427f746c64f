use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::db::map_constraint_error;
use crate::documents::store::{ContentUpdate, DocumentStore, Page};
use crate::errors::AppError;
use crate::models::document::{Document, DocumentPatch, DocumentRow, DocumentType, NewDocument};

/// Postgres-backed store. Uniqueness rules live in the schema (see migrations);
/// violations surface as `Conflict`.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn create(&self, doc: NewDocument) -> Result<Document, AppError> {
        let doc = doc.into_document(chrono::Utc::now())?;
        let revision_settings = doc
            .revision_settings
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize revision_settings: {e}")))?;

        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            INSERT INTO documents
                (uuid, user_ref, document_type, title, content, version, version_type,
                 parent_document_uuid, revision_count, revision_settings, form_data,
                 word_count, language, status, ai_model, workflow_run_id, generation_params)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING *
            "#,
        )
        .bind(doc.uuid)
        .bind(&doc.user_ref)
        .bind(doc.document_type.as_str())
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(doc.version)
        .bind(doc.version_type.as_str())
        .bind(doc.parent_document_uuid)
        .bind(doc.revision_count)
        .bind(&revision_settings)
        .bind(&doc.form_data)
        .bind(doc.word_count)
        .bind(&doc.language)
        .bind(doc.status.as_str())
        .bind(&doc.ai_model)
        .bind(&doc.workflow_run_id)
        .bind(&doc.generation_params)
        .fetch_one(&self.pool)
        .await
        .map_err(map_constraint_error)?;

        info!(
            "Inserted document {} version {} ({})",
            row.uuid, row.version, row.version_type
        );
        Document::try_from(row)
    }

    async fn update_content(
        &self,
        uuid: Uuid,
        update: ContentUpdate,
    ) -> Result<Document, AppError> {
        // CRITICAL: single conditional UPDATE. Only a root without a revised child matches.
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            UPDATE documents d
            SET content = $2,
                word_count = $3,
                workflow_run_id = COALESCE($4, d.workflow_run_id),
                updated_at = now()
            WHERE d.uuid = $1
              AND d.parent_document_uuid IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM documents c
                  WHERE c.parent_document_uuid = d.uuid AND c.version_type = 'revised'
              )
            RETURNING d.*
            "#,
        )
        .bind(uuid)
        .bind(&update.content)
        .bind(update.word_count)
        .bind(&update.workflow_run_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Document::try_from(row),
            None => match self.find_by_uuid(uuid).await? {
                Some(_) => Err(AppError::Conflict(format!(
                    "content of document {uuid} is frozen; create a revision instead"
                ))),
                None => Err(AppError::NotFound(format!("Document {uuid} not found"))),
            },
        }
    }

    async fn update_metadata(
        &self,
        uuid: Uuid,
        patch: DocumentPatch,
    ) -> Result<Document, AppError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            UPDATE documents
            SET status = COALESCE($2, status),
                title = COALESCE($3, title),
                updated_at = now()
            WHERE uuid = $1
            RETURNING *
            "#,
        )
        .bind(uuid)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(&patch.title)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_constraint_error)?
        .ok_or_else(|| AppError::NotFound(format!("Document {uuid} not found")))?;

        Document::try_from(row)
    }

    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Document>, AppError> {
        sqlx::query_as::<_, DocumentRow>("SELECT * FROM documents WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?
            .map(Document::try_from)
            .transpose()
    }

    async fn find_lineage(&self, root_uuid: Uuid) -> Result<Vec<Document>, AppError> {
        sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT * FROM documents
            WHERE uuid = $1 OR parent_document_uuid = $1
            ORDER BY version ASC
            "#,
        )
        .bind(root_uuid)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Document::try_from)
        .collect()
    }

    async fn find_by_user(
        &self,
        user_ref: &str,
        document_type: Option<DocumentType>,
        page: Page,
    ) -> Result<Vec<Document>, AppError> {
        sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT * FROM documents
            WHERE user_ref = $1
              AND ($2::text IS NULL OR document_type = $2)
              AND parent_document_uuid IS NULL
              AND status = 'active'
            ORDER BY created_at DESC, uuid DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_ref)
        .bind(document_type.map(|t| t.as_str()))
        .bind(i64::from(page.limit))
        .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Document::try_from)
        .collect()
    }
}
