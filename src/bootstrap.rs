/// Orchestrator setup and initialization
///
/// Wires together all components: store connection, workflow storage, definition
/// registry, subscription cache and webhook sender.

use crate::{
    config::Config,
    orchestrator::Orchestrator,
    project::DatabaseManager,
    workflow::{registry::DefinitionRegistry, storage::WorkflowStorage},
};
use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// Verbosity follows `RUST_LOG` (default `info`). Calling it twice is harmless,
/// the second call keeps the subscriber already installed.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .try_init();
}

/// Build a ready-to-use orchestrator from configuration
///
/// Opens the store (creating the schema when missing) and loads every stored
/// workflow definition into the registry.
pub async fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    tracing::info!("🗄️ Connecting to case store");
    let database = DatabaseManager::connect(&config.database)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open case store: {}", e))?;

    tracing::info!("📋 Initializing workflow storage");
    let storage = WorkflowStorage::new(database.pool().clone());

    tracing::info!("📊 Initializing definition registry");
    let registry = Arc::new(DefinitionRegistry::new(storage.clone()));

    tracing::info!("📥 Loading existing workflow definitions from storage");
    registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflow definitions from storage: {}", e))?;

    let orchestrator = Orchestrator::new(storage, registry, config)?;

    tracing::info!(
        environment = %config.webhooks.environment,
        api_version = config.webhooks.api_version,
        "✅ Orchestrator initialized successfully"
    );

    Ok(orchestrator)
}
