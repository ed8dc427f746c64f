//! Free-revision policy.
//!
//! Every lineage gets exactly one revision, whichever scope it uses (whole
//! document or a single paragraph). The authoritative check always runs on a
//! freshly loaded lineage; `has_used_free_revision` exposed to clients is a UX
//! hint only. The partial unique index on `documents` backs this up when two
//! requests pass the guard at the same time.

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::documents::lineage::VersionLineageManager;
use crate::errors::AppError;
use crate::models::document::{Document, VersionType};

/// Granularity of a revision. Both consume the same allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum RevisionScope {
    /// Whole-document rewrite steered by styles, word control and direction.
    Document,
    /// Replacement of one paragraph (0-based, blank-line separated).
    Paragraph { index: usize },
}

/// True iff any version in the lineage is `revised`. Monotonic: revisions are
/// never removed, only logically deleted, so this never flips back.
pub fn has_used_free_revision(lineage: &[Document]) -> bool {
    lineage
        .iter()
        .any(|d| d.version_type == VersionType::Revised)
}

/// Fails with `FREE_REVISION_EXHAUSTED` when the allowance is spent.
pub fn guard(lineage: &[Document]) -> Result<(), AppError> {
    if has_used_free_revision(lineage) {
        return Err(AppError::free_revision_exhausted());
    }
    Ok(())
}

pub struct RevisionPolicyGuard<'a> {
    lineage: &'a VersionLineageManager,
}

impl<'a> RevisionPolicyGuard<'a> {
    pub fn new(lineage: &'a VersionLineageManager) -> Self {
        Self { lineage }
    }

    /// Reloads the lineage from storage and evaluates the guard against it.
    /// Returns the fresh lineage so the caller doesn't read twice.
    pub async fn check(
        &self,
        root_uuid: Uuid,
        scope: RevisionScope,
    ) -> Result<Vec<Document>, AppError> {
        let lineage = self.lineage.load(root_uuid).await?;
        if let Err(e) = guard(&lineage) {
            warn!("Rejected {scope:?} revision of lineage {root_uuid}: free revision already used");
            return Err(e);
        }
        Ok(lineage)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::documents::memory_store::InMemoryDocumentStore;
    use crate::documents::store::DocumentStore;
    use crate::errors::FREE_REVISION_EXHAUSTED;
    use crate::models::document::{DocumentType, NewDocument, RevisionSettings};

    #[tokio::test]
    async fn test_free_revision_flag_is_monotonic() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let manager = VersionLineageManager::new(store.clone());
        let root = store
            .create(NewDocument {
                user_ref: "u".to_string(),
                document_type: Some(DocumentType::CoverLetter),
                ..Default::default()
            })
            .await
            .unwrap();

        let lineage = manager.load(root.uuid).await.unwrap();
        assert!(!has_used_free_revision(&lineage));
        assert!(guard(&lineage).is_ok());

        manager
            .create_revision(
                root.uuid,
                "revised".to_string(),
                RevisionSettings::default(),
                Default::default(),
            )
            .await
            .unwrap();

        for _ in 0..3 {
            let lineage = manager.load(root.uuid).await.unwrap();
            assert!(has_used_free_revision(&lineage));
        }

        // Logical deletion of the revision doesn't restore the allowance.
        let revision_uuid = manager.load(root.uuid).await.unwrap()[1].uuid;
        store
            .update_metadata(
                revision_uuid,
                crate::models::document::DocumentPatch {
                    status: Some(crate::models::document::DocumentStatus::Deleted),
                    title: None,
                },
            )
            .await
            .unwrap();
        let lineage = manager.load(root.uuid).await.unwrap();
        assert!(has_used_free_revision(&lineage));
    }

    #[tokio::test]
    async fn test_check_rejects_both_scopes_after_revision() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let manager = VersionLineageManager::new(store.clone());
        let root = store
            .create(NewDocument {
                user_ref: "u".to_string(),
                document_type: Some(DocumentType::Sop),
                ..Default::default()
            })
            .await
            .unwrap();
        let policy = RevisionPolicyGuard::new(&manager);

        let fresh = policy.check(root.uuid, RevisionScope::Document).await.unwrap();
        assert_eq!(fresh.len(), 1);

        manager
            .create_revision(
                root.uuid,
                "text".to_string(),
                RevisionSettings::default(),
                Default::default(),
            )
            .await
            .unwrap();

        for scope in [RevisionScope::Document, RevisionScope::Paragraph { index: 0 }] {
            let err = policy.check(root.uuid, scope).await.unwrap_err();
            assert_eq!(err.code(), FREE_REVISION_EXHAUSTED);
        }
    }

    #[test]
    fn test_scope_serde_shape() {
        let scope: RevisionScope =
            serde_json::from_value(serde_json::json!({ "scope": "paragraph", "index": 2 }))
                .unwrap();
        assert_eq!(scope, RevisionScope::Paragraph { index: 2 });
        let scope: RevisionScope =
            serde_json::from_value(serde_json::json!({ "scope": "document" })).unwrap();
        assert_eq!(scope, RevisionScope::Document);
    }
}
