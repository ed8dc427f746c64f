use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::config::StorageBackend;
use crate::state::AppState;

/// GET /health
/// Returns a simple status object with service version and storage backend.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let storage = match state.config.storage_backend {
        StorageBackend::Postgres => "postgres",
        StorageBackend::Memory => "memory",
    };
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "appdocs-api",
        "storage": storage,
    }))
}
