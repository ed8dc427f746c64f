pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::documents::handlers as documents;
use crate::generation::handlers as generation;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Documents + lineage
        .route(
            "/api/v1/documents",
            post(documents::handle_create_document).get(documents::handle_list_documents),
        )
        .route(
            "/api/v1/documents/:uuid",
            get(documents::handle_get_document)
                .patch(documents::handle_update_document)
                .delete(documents::handle_delete_document),
        )
        .route(
            "/api/v1/documents/:uuid/versions",
            get(documents::handle_list_versions),
        )
        // Generation sessions
        .route(
            "/api/v1/documents/:uuid/generate",
            post(generation::handle_generate),
        )
        .route(
            "/api/v1/documents/:uuid/revise",
            post(generation::handle_revise),
        )
        .route(
            "/api/v1/documents/:uuid/generation",
            get(generation::handle_generation_status),
        )
        .route(
            "/api/v1/documents/:uuid/generation/stop",
            post(generation::handle_stop_generation),
        )
        .with_state(state)
}
