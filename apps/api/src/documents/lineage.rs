//! Version lineage: builds and queries version chains on top of `DocumentStore`.
//!
//! A lineage is flat: one root (`version = 1`, `original`) and children that all
//! point at the root. Revisions are append-only INSERTs; nothing here UPDATEs
//! content of an existing version.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::documents::store::DocumentStore;
use crate::documents::word_count::count_words;
use crate::errors::AppError;
use crate::models::document::{Document, NewDocument, RevisionSettings, VersionType};

/// Provenance of a generated revision, recorded on the new row.
#[derive(Debug, Clone, Default)]
pub struct RevisionProvenance {
    pub workflow_run_id: Option<String>,
    pub generation_params: Option<Value>,
}

/// `max(version) + 1`. An empty lineage starts at 1.
pub fn next_version(lineage: &[Document]) -> i32 {
    lineage.iter().map(|d| d.version).max().unwrap_or(0) + 1
}

/// Number of `revised` rows in the lineage.
pub fn revised_count(lineage: &[Document]) -> i32 {
    lineage
        .iter()
        .filter(|d| d.version_type == VersionType::Revised)
        .count() as i32
}

/// Finds the root of an already-loaded lineage.
pub fn lineage_root(lineage: &[Document]) -> Option<&Document> {
    lineage.iter().find(|d| d.is_root())
}

/// Picks the version a viewer should show, in priority order:
/// 1. `just_created` (forces the view onto a freshly committed revision),
/// 2. `explicit` when it belongs to this lineage,
/// 3. the root,
/// 4. the first element.
///
/// Ids that don't resolve within the lineage are skipped rather than trusted.
pub fn resolve_display_version(
    lineage: &[Document],
    explicit: Option<Uuid>,
    just_created: Option<Uuid>,
) -> Option<&Document> {
    let find = |id: Option<Uuid>| id.and_then(|id| lineage.iter().find(|d| d.uuid == id));

    find(just_created)
        .or_else(|| find(explicit))
        .or_else(|| lineage_root(lineage))
        .or_else(|| lineage.first())
}

#[derive(Clone)]
pub struct VersionLineageManager {
    store: Arc<dyn DocumentStore>,
}

impl VersionLineageManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Loads a lineage and fails with `NotFound` if the root does not exist.
    pub async fn load(&self, root_uuid: Uuid) -> Result<Vec<Document>, AppError> {
        let lineage = self.store.find_lineage(root_uuid).await?;
        if lineage_root(&lineage).map(|r| r.uuid) != Some(root_uuid) {
            return Err(AppError::NotFound(format!(
                "Document lineage {root_uuid} not found"
            )));
        }
        Ok(lineage)
    }

    /// Resolves any version uuid to its lineage root and loads the lineage.
    pub async fn load_for(&self, document_uuid: Uuid) -> Result<Vec<Document>, AppError> {
        let doc = self
            .store
            .find_by_uuid(document_uuid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Document {document_uuid} not found")))?;
        self.load(doc.root_uuid()).await
    }

    /// Appends a `revised` child to the lineage rooted at `root_uuid`.
    ///
    /// Does not evaluate the free-revision policy: callers run the guard first.
    /// The store's uniqueness constraints are what make concurrent callers safe;
    /// the loser gets `Conflict`.
    pub async fn create_revision(
        &self,
        root_uuid: Uuid,
        content: String,
        revision_settings: RevisionSettings,
        provenance: RevisionProvenance,
    ) -> Result<Document, AppError> {
        revision_settings.validate()?;
        let lineage = self.load(root_uuid).await?;
        let root = lineage_root(&lineage)
            .ok_or_else(|| AppError::NotFound(format!("Document lineage {root_uuid} not found")))?;

        let version = next_version(&lineage);
        let revision_count = revised_count(&lineage) + 1;
        let word_count = count_words(&content);

        let new_doc = NewDocument {
            uuid: None,
            user_ref: root.user_ref.clone(),
            document_type: Some(root.document_type),
            title: root.title.clone(),
            content,
            version: Some(version),
            version_type: Some(VersionType::Revised),
            parent_document_uuid: Some(root.uuid),
            revision_count: Some(revision_count),
            revision_settings: Some(revision_settings),
            form_data: root.form_data.clone(),
            word_count: Some(word_count),
            language: Some(root.language.clone()),
            status: None,
            ai_model: root.ai_model.clone(),
            workflow_run_id: provenance.workflow_run_id,
            generation_params: provenance.generation_params,
        };

        let created = self.store.create(new_doc).await?;
        info!(
            "Created revision {} (version {}) in lineage {}",
            created.uuid, created.version, root_uuid
        );
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::memory_store::InMemoryDocumentStore;
    use crate::models::document::{DocumentType, WordControl};

    async fn seeded() -> (VersionLineageManager, Arc<dyn DocumentStore>, Document) {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let root = store
            .create(NewDocument {
                user_ref: "user-1".to_string(),
                document_type: Some(DocumentType::PersonalStatement),
                content: "First draft".to_string(),
                form_data: serde_json::json!({ "school": "MIT" }),
                language: Some("en".to_string()),
                ai_model: Some("workflow-v2".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        (VersionLineageManager::new(store.clone()), store, root)
    }

    fn settings() -> RevisionSettings {
        RevisionSettings {
            styles: vec!["concise".to_string()],
            word_control: WordControl::Reduce,
            target_word_count: Some(400),
            free_text_direction: "more confident".to_string(),
        }
    }

    #[test]
    fn test_next_version_is_max_plus_one() {
        assert_eq!(next_version(&[]), 1);

        let now = chrono::Utc::now();
        let root = NewDocument {
            user_ref: "u".to_string(),
            document_type: Some(DocumentType::Sop),
            ..Default::default()
        }
        .into_document(now)
        .unwrap();
        let third = NewDocument {
            user_ref: "u".to_string(),
            document_type: Some(DocumentType::Sop),
            version: Some(3),
            version_type: Some(VersionType::Revised),
            parent_document_uuid: Some(root.uuid),
            ..Default::default()
        }
        .into_document(now)
        .unwrap();

        assert_eq!(next_version(&[root.clone(), third.clone()]), 4);
        assert_eq!(next_version(&[third, root]), 4);
    }

    #[tokio::test]
    async fn test_create_revision_appends_child_with_copied_metadata() {
        let (manager, store, root) = seeded().await;

        let revision = manager
            .create_revision(
                root.uuid,
                "Second draft text".to_string(),
                settings(),
                RevisionProvenance {
                    workflow_run_id: Some("run-9".to_string()),
                    generation_params: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(revision.version, 2);
        assert_eq!(revision.version_type, VersionType::Revised);
        assert_eq!(revision.parent_document_uuid, Some(root.uuid));
        assert_eq!(revision.revision_count, 1);
        assert_eq!(revision.document_type, root.document_type);
        assert_eq!(revision.form_data, root.form_data);
        assert_eq!(revision.language, root.language);
        assert_eq!(revision.ai_model, root.ai_model);
        assert_eq!(revision.word_count, 3);
        assert_eq!(revision.revision_settings, Some(settings()));
        assert_eq!(revision.workflow_run_id.as_deref(), Some("run-9"));

        let lineage = store.find_lineage(root.uuid).await.unwrap();
        let versions: Vec<i32> = lineage.iter().map(|d| d.version).collect();
        assert_eq!(versions, vec![1, 2]);
        // Root content is untouched.
        assert_eq!(lineage[0].content, "First draft");
    }

    #[tokio::test]
    async fn test_create_revision_rejects_non_root() {
        let (manager, _store, root) = seeded().await;
        let revision = manager
            .create_revision(root.uuid, "x".to_string(), settings(), Default::default())
            .await
            .unwrap();

        let err = manager
            .create_revision(revision.uuid, "y".to_string(), settings(), Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_revision_unknown_root_is_not_found() {
        let (manager, _store, _root) = seeded().await;
        let err = manager
            .create_revision(Uuid::new_v4(), "x".to_string(), settings(), Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_create_revision_exactly_one_wins() {
        let (manager, store, root) = seeded().await;
        let a = manager.clone();
        let b = manager.clone();

        let (first, second) = tokio::join!(
            tokio::spawn(async move {
                a.create_revision(root.uuid, "A".to_string(), settings(), Default::default())
                    .await
            }),
            tokio::spawn(async move {
                b.create_revision(root.uuid, "B".to_string(), settings(), Default::default())
                    .await
            }),
        );
        let results = [first.unwrap(), second.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AppError::Conflict(_)))));
        assert_eq!(store.find_lineage(root.uuid).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_load_for_resolves_child_to_root() {
        let (manager, _store, root) = seeded().await;
        let revision = manager
            .create_revision(root.uuid, "x".to_string(), settings(), Default::default())
            .await
            .unwrap();

        let lineage = manager.load_for(revision.uuid).await.unwrap();
        assert_eq!(lineage.len(), 2);
        assert_eq!(lineage[0].uuid, root.uuid);
    }

    #[tokio::test]
    async fn test_resolve_display_version_priority() {
        let (manager, _store, root) = seeded().await;
        let revision = manager
            .create_revision(root.uuid, "x".to_string(), settings(), Default::default())
            .await
            .unwrap();
        let lineage = manager.load(root.uuid).await.unwrap();

        // just_created wins over explicit
        let shown = resolve_display_version(&lineage, Some(root.uuid), Some(revision.uuid));
        assert_eq!(shown.unwrap().uuid, revision.uuid);

        // explicit when it resolves
        let shown = resolve_display_version(&lineage, Some(revision.uuid), None);
        assert_eq!(shown.unwrap().uuid, revision.uuid);

        // foreign ids fall through to the root
        let shown = resolve_display_version(&lineage, Some(Uuid::new_v4()), Some(Uuid::new_v4()));
        assert_eq!(shown.unwrap().uuid, root.uuid);

        assert!(resolve_display_version(&[], None, None).is_none());
    }

    #[test]
    fn test_resolve_display_version_falls_back_to_first_without_root() {
        let now = chrono::Utc::now();
        let orphan = NewDocument {
            user_ref: "u".to_string(),
            document_type: Some(DocumentType::Resume),
            version: Some(3),
            version_type: Some(VersionType::Revised),
            parent_document_uuid: Some(Uuid::new_v4()),
            ..Default::default()
        }
        .into_document(now)
        .unwrap();

        let lineage = vec![orphan.clone()];
        let shown = resolve_display_version(&lineage, None, None).unwrap();
        assert_eq!(shown.uuid, orphan.uuid);
    }
}
