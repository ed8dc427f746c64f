use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Creates a PostgreSQL connection pool and applies pending migrations.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to apply database migrations")?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Maps Postgres unique/foreign-key violations to `Conflict`/`NotFound`, so every
/// store backend reports constraint failures the same way.
pub fn map_constraint_error(err: sqlx::Error) -> crate::errors::AppError {
    use crate::errors::AppError;

    if let sqlx::Error::Database(db_err) = &err {
        let constraint = db_err.constraint().unwrap_or_default().to_string();
        match db_err.code().as_deref() {
            Some("23505") => {
                let message = match constraint.as_str() {
                    "documents_free_revision_key" => {
                        "lineage already has its free revision".to_string()
                    }
                    "documents_lineage_version_key" => {
                        "version already exists in this lineage".to_string()
                    }
                    "documents_pkey" => "document uuid already exists".to_string(),
                    _ => format!("unique constraint '{constraint}' violated"),
                };
                return AppError::Conflict(message);
            }
            Some("23503") => {
                return AppError::NotFound("parent document not found".to_string());
            }
            Some("23514") => {
                let message = match constraint.as_str() {
                    "documents_flat_lineage" => "parent is not a lineage root".to_string(),
                    _ => format!("check constraint '{constraint}' violated"),
                };
                return AppError::Validation(message);
            }
            _ => {}
        }
    }
    AppError::Database(err)
}
