use std::collections::HashMap;

use anyhow::{bail, Context, Result};

use crate::models::document::DocumentType;
use crate::workflow_client::WorkflowKeys;

/// Where documents are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local; for local development and demos.
    Memory,
}

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage_backend: StorageBackend,
    pub database_url: Option<String>,
    /// Snapshots fall back to process memory when unset.
    pub redis_url: Option<String>,
    pub workflow_api_url: String,
    pub workflow_keys: WorkflowKeys,
    pub workflow_timeout_secs: u64,
    pub snapshot_ttl_secs: u64,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| {
            var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
        };

        let storage_backend = match var("STORAGE_BACKEND").as_deref() {
            None | Some("postgres") => StorageBackend::Postgres,
            Some("memory") => StorageBackend::Memory,
            Some(other) => bail!("STORAGE_BACKEND must be 'postgres' or 'memory', got '{other}'"),
        };
        let database_url = match storage_backend {
            StorageBackend::Postgres => Some(require("DATABASE_URL")?),
            StorageBackend::Memory => var("DATABASE_URL"),
        };

        let per_type: HashMap<DocumentType, String> = DocumentType::ALL
            .iter()
            .filter_map(|ty| {
                let key = format!("WORKFLOW_API_KEY_{}", ty.as_str().to_uppercase());
                var(&key).map(|value| (*ty, value))
            })
            .collect();

        Ok(Config {
            storage_backend,
            database_url,
            redis_url: var("REDIS_URL"),
            workflow_api_url: require("WORKFLOW_API_URL")?
                .trim_end_matches('/')
                .to_string(),
            workflow_keys: WorkflowKeys {
                default: require("WORKFLOW_API_KEY")?,
                per_type,
                revision: var("WORKFLOW_API_KEY_REVISION"),
            },
            workflow_timeout_secs: parse_or(&var, "WORKFLOW_TIMEOUT_SECS", 300)?,
            snapshot_ttl_secs: parse_or(&var, "SNAPSHOT_TTL_SECS", 86_400)?,
            port: var("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn parse_or(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    match var(key) {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{key} must be a whole number of seconds")),
        None => Ok(default),
    }
}
