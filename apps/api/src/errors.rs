use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Permission code returned once a lineage has consumed its free revision.
pub const FREE_REVISION_EXHAUSTED: &str = "FREE_REVISION_EXHAUSTED";

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Required input missing or malformed. Raised before any channel is opened.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Non-retryable policy rejection. Carries a stable machine-readable code.
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Storage-level uniqueness violation or a state that forbids the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The engine channel dropped or errored mid-stream.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Generation succeeded but the commit write failed; content is unsaved.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Snapshot store error: {0}")]
    Snapshot(#[from] redis::RedisError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn free_revision_exhausted() -> Self {
        AppError::Permission(FREE_REVISION_EXHAUSTED.to_string())
    }

    /// Stable code used in response bodies and session failure reports.
    pub fn code(&self) -> &str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Permission(code) => code.as_str(),
            AppError::Conflict(_) => "CONFLICT",
            AppError::Transport(_) => "TRANSPORT_ERROR",
            AppError::Persistence(_) => "PERSISTENCE_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Snapshot(_) => "SNAPSHOT_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code().to_string();
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Permission(code) if code == FREE_REVISION_EXHAUSTED => (
                StatusCode::FORBIDDEN,
                "The free revision for this document has already been used".to_string(),
            ),
            AppError::Permission(_) => (StatusCode::FORBIDDEN, "Access denied".to_string()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Transport(msg) => {
                tracing::warn!("Transport error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "The generation engine connection failed".to_string(),
                )
            }
            AppError::Persistence(msg) => {
                tracing::error!("Persistence error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "The generated content could not be saved".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                )
            }
            AppError::Snapshot(e) => {
                tracing::error!("Snapshot store error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A session storage error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
