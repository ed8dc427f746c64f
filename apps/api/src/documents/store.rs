//! DocumentStore: persistence for `documents` rows. No business rules beyond
//! the storage-level constraints every backend must enforce:
//!
//! - uuid is unique;
//! - a child's parent is itself a lineage root (lineages are flat);
//! - `(root uuid, version)` is unique within a lineage;
//! - at most one `revised` row per root (the free-revision index);
//! - content is only rewritten in place on a root with no revised children.
//!
//! `AppState` holds an `Arc<dyn DocumentStore>`, chosen at startup via config.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::document::{Document, DocumentPatch, DocumentType, NewDocument};

/// Default and maximum page sizes for `find_by_user`.
pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 50;

/// Content write-back of the initial generation.
#[derive(Debug, Clone)]
pub struct ContentUpdate {
    pub content: String,
    pub word_count: i32,
    pub workflow_run_id: Option<String>,
}

/// 1-based page request, clamped to sane bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        }
    }

    /// Rows to skip. Widened so large page numbers cannot overflow.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new(None, None)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts a new row. Fails with `Conflict` on any uniqueness violation.
    async fn create(&self, doc: NewDocument) -> Result<Document, AppError>;

    /// Rewrites content on a lineage root that has not yet been revised.
    async fn update_content(&self, uuid: Uuid, update: ContentUpdate)
        -> Result<Document, AppError>;

    /// Updates non-content fields. Allowed at any time.
    async fn update_metadata(&self, uuid: Uuid, patch: DocumentPatch)
        -> Result<Document, AppError>;

    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Document>, AppError>;

    /// Root plus flat children, ordered by version ascending.
    async fn find_lineage(&self, root_uuid: Uuid) -> Result<Vec<Document>, AppError>;

    /// One row per lineage (active roots only), newest first.
    async fn find_by_user(
        &self,
        user_ref: &str,
        document_type: Option<DocumentType>,
        page: Page,
    ) -> Result<Vec<Document>, AppError>;
}
