use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::AppError;

/// Max length (in characters) of the free-text revision direction.
pub const MAX_DIRECTION_CHARS: usize = 30;

// ────────────────────────────────────────────────────────────────────────────
// Enumerations (stored as TEXT)
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    RecommendationLetter,
    Resume,
    CoverLetter,
    Sop,
    PersonalStatement,
    StudyAbroadConsultation,
}

impl DocumentType {
    pub const ALL: [DocumentType; 6] = [
        DocumentType::RecommendationLetter,
        DocumentType::Resume,
        DocumentType::CoverLetter,
        DocumentType::Sop,
        DocumentType::PersonalStatement,
        DocumentType::StudyAbroadConsultation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::RecommendationLetter => "recommendation_letter",
            DocumentType::Resume => "resume",
            DocumentType::CoverLetter => "cover_letter",
            DocumentType::Sop => "sop",
            DocumentType::PersonalStatement => "personal_statement",
            DocumentType::StudyAbroadConsultation => "study_abroad_consultation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    Original,
    Revised,
}

impl VersionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionType::Original => "original",
            VersionType::Revised => "revised",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Active,
    Deleted,
    Draft,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Active => "active",
            DocumentStatus::Deleted => "deleted",
            DocumentStatus::Draft => "draft",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordControl {
    #[default]
    Keep,
    Expand,
    Reduce,
}

impl WordControl {
    pub fn as_str(&self) -> &'static str {
        match self {
            WordControl::Keep => "keep",
            WordControl::Expand => "expand",
            WordControl::Reduce => "reduce",
        }
    }
}

/// Generates `FromStr` + `Display` for the TEXT-backed enums above.
macro_rules! text_enum {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s == $ty::$variant.as_str() {
                        return Ok($ty::$variant);
                    }
                )+
                Err(AppError::Validation(format!(
                    "Unknown {} '{s}'",
                    stringify!($ty)
                )))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(DocumentType {
    RecommendationLetter,
    Resume,
    CoverLetter,
    Sop,
    PersonalStatement,
    StudyAbroadConsultation,
});
text_enum!(VersionType { Original, Revised });
text_enum!(DocumentStatus { Active, Deleted, Draft });

// ────────────────────────────────────────────────────────────────────────────
// Revision settings
// ────────────────────────────────────────────────────────────────────────────

/// User-chosen controls for a revision, persisted on the revised row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevisionSettings {
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default)]
    pub word_control: WordControl,
    #[serde(default)]
    pub target_word_count: Option<u32>,
    #[serde(default)]
    pub free_text_direction: String,
}

impl RevisionSettings {
    pub fn validate(&self) -> Result<(), AppError> {
        let direction_len = self.free_text_direction.chars().count();
        if direction_len > MAX_DIRECTION_CHARS {
            return Err(AppError::Validation(format!(
                "free_text_direction must be at most {MAX_DIRECTION_CHARS} characters (got {direction_len})"
            )));
        }
        if self.styles.iter().any(|s| s.trim().is_empty()) {
            return Err(AppError::Validation(
                "styles must not contain empty tags".to_string(),
            ));
        }
        if self.target_word_count == Some(0) {
            return Err(AppError::Validation(
                "target_word_count must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Row + domain types
// ────────────────────────────────────────────────────────────────────────────

/// Raw `documents` row as stored in Postgres.
#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub uuid: Uuid,
    pub user_ref: String,
    pub document_type: String,
    pub title: Option<String>,
    pub content: String,
    pub version: i32,
    pub version_type: String,
    pub parent_document_uuid: Option<Uuid>,
    pub revision_count: i32,
    pub revision_settings: Option<Value>,
    pub form_data: Value,
    pub word_count: i32,
    pub language: String,
    pub status: String,
    pub ai_model: Option<String>,
    pub workflow_run_id: Option<String>,
    pub generation_params: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One version of a document. A lineage is the root plus its flat children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub uuid: Uuid,
    pub user_ref: String,
    pub document_type: DocumentType,
    pub title: Option<String>,
    pub content: String,
    pub version: i32,
    pub version_type: VersionType,
    pub parent_document_uuid: Option<Uuid>,
    pub revision_count: i32,
    pub revision_settings: Option<RevisionSettings>,
    pub form_data: Value,
    pub word_count: i32,
    pub language: String,
    pub status: DocumentStatus,
    pub ai_model: Option<String>,
    pub workflow_run_id: Option<String>,
    pub generation_params: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// The uuid of the lineage root this version belongs to.
    pub fn root_uuid(&self) -> Uuid {
        self.parent_document_uuid.unwrap_or(self.uuid)
    }

    pub fn is_root(&self) -> bool {
        self.parent_document_uuid.is_none() && self.version_type == VersionType::Original
    }
}

impl TryFrom<DocumentRow> for Document {
    type Error = AppError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        let revision_settings = row
            .revision_settings
            .filter(|v| !v.is_null())
            .map(serde_json::from_value::<RevisionSettings>)
            .transpose()
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!(
                    "Corrupt revision_settings on document {}: {e}",
                    row.uuid
                ))
            })?;

        Ok(Document {
            uuid: row.uuid,
            user_ref: row.user_ref,
            document_type: row.document_type.parse()?,
            title: row.title,
            content: row.content,
            version: row.version,
            version_type: row.version_type.parse()?,
            parent_document_uuid: row.parent_document_uuid,
            revision_count: row.revision_count,
            revision_settings,
            form_data: row.form_data,
            word_count: row.word_count,
            language: row.language,
            status: row.status.parse()?,
            ai_model: row.ai_model,
            workflow_run_id: row.workflow_run_id,
            generation_params: row.generation_params,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Insert payload for `DocumentStore::create`. Unset fields take the root defaults:
/// fresh uuid, version 1, original, active, revision_count 0.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDocument {
    pub uuid: Option<Uuid>,
    pub user_ref: String,
    pub document_type: Option<DocumentType>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub version: Option<i32>,
    #[serde(default)]
    pub version_type: Option<VersionType>,
    #[serde(default)]
    pub parent_document_uuid: Option<Uuid>,
    #[serde(default)]
    pub revision_count: Option<i32>,
    #[serde(default)]
    pub revision_settings: Option<RevisionSettings>,
    #[serde(default)]
    pub form_data: Value,
    #[serde(default)]
    pub word_count: Option<i32>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub status: Option<DocumentStatus>,
    #[serde(default)]
    pub ai_model: Option<String>,
    #[serde(default)]
    pub workflow_run_id: Option<String>,
    #[serde(default)]
    pub generation_params: Option<Value>,
}

impl NewDocument {
    /// Resolves defaults and checks the lineage-shape invariants every backend relies on.
    pub fn into_document(self, now: DateTime<Utc>) -> Result<Document, AppError> {
        if self.user_ref.trim().is_empty() {
            return Err(AppError::Validation("user_ref is required".to_string()));
        }
        let document_type = self
            .document_type
            .ok_or_else(|| AppError::Validation("document_type is required".to_string()))?;
        if let Some(settings) = &self.revision_settings {
            settings.validate()?;
        }

        let version_type = self.version_type.unwrap_or(VersionType::Original);
        let version = self.version.unwrap_or(1);
        match (version_type, self.parent_document_uuid) {
            (VersionType::Original, Some(_)) => {
                return Err(AppError::Validation(
                    "an original version cannot have a parent document".to_string(),
                ))
            }
            (VersionType::Original, None) if version != 1 => {
                return Err(AppError::Validation(
                    "an original version must be version 1".to_string(),
                ))
            }
            (VersionType::Revised, None) => {
                return Err(AppError::Validation(
                    "a revised version must reference its root document".to_string(),
                ))
            }
            (VersionType::Revised, Some(_)) if version < 2 => {
                return Err(AppError::Validation(
                    "a revised version must be version 2 or later".to_string(),
                ))
            }
            _ => {}
        }

        let word_count = self
            .word_count
            .unwrap_or_else(|| crate::documents::word_count::count_words(&self.content));
        let form_data = if self.form_data.is_null() {
            Value::Object(Default::default())
        } else {
            self.form_data
        };

        Ok(Document {
            uuid: self.uuid.unwrap_or_else(Uuid::new_v4),
            user_ref: self.user_ref,
            document_type,
            title: self.title,
            content: self.content,
            version,
            version_type,
            parent_document_uuid: self.parent_document_uuid,
            revision_count: self.revision_count.unwrap_or(0),
            revision_settings: self.revision_settings,
            form_data,
            word_count,
            language: self.language.unwrap_or_else(|| "en".to_string()),
            status: self.status.unwrap_or_default(),
            ai_model: self.ai_model,
            workflow_run_id: self.workflow_run_id,
            generation_params: self.generation_params,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Non-content fields that may change at any time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentPatch {
    pub status: Option<DocumentStatus>,
    pub title: Option<String>,
}

impl DocumentPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.title.is_none()
    }
}
