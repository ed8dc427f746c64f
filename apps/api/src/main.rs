mod config;
mod db;
mod documents;
mod errors;
mod generation;
mod models;
mod routes;
mod state;
mod workflow_client;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, StorageBackend};
use crate::db::create_pool;
use crate::documents::memory_store::InMemoryDocumentStore;
use crate::documents::pg_store::PgDocumentStore;
use crate::documents::store::DocumentStore;
use crate::generation::registry::SessionRegistry;
use crate::generation::snapshot::{InMemorySnapshotStore, RedisSnapshotStore, SnapshotStore};
use crate::routes::build_router;
use crate::state::AppState;
use crate::workflow_client::WorkflowClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting AppDocs API v{}", env!("CARGO_PKG_VERSION"));

    // Document storage
    let store: Arc<dyn DocumentStore> = match config.storage_backend {
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres backend")?;
            Arc::new(PgDocumentStore::new(create_pool(url).await?))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory document storage; data is lost on restart");
            Arc::new(InMemoryDocumentStore::new())
        }
    };

    // Session snapshots
    let snapshots: Arc<dyn SnapshotStore> = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            info!("Redis snapshot store initialized (ttl {}s)", config.snapshot_ttl_secs);
            Arc::new(RedisSnapshotStore::new(client, config.snapshot_ttl_secs))
        }
        None => {
            info!("REDIS_URL not set; session snapshots kept in memory");
            Arc::new(InMemorySnapshotStore::new())
        }
    };

    // Workflow engine client
    let engine = WorkflowClient::new(
        config.workflow_api_url.clone(),
        config.workflow_keys.clone(),
        Duration::from_secs(config.workflow_timeout_secs),
    )?;
    info!("Workflow client initialized ({})", config.workflow_api_url);

    // Build app state
    let state = AppState {
        store,
        engine: Arc::new(engine),
        sessions: SessionRegistry::new(),
        snapshots,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the web client's domain is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
