use anyhow::{bail, Context};
use tracing::info;

use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::database::{DatabaseManager, PgStore, PoolSettings};

pub async fn handle(config: AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    if config.uses_memory_store() {
        bail!("DATABASE_URL points at the in-memory store; there is nothing to migrate");
    }

    let manager = DatabaseManager::connect(&config.database.url, PoolSettings::from_config(&config))
        .await
        .context("failed to connect to the credential store")?;
    let store = PgStore::new(manager.main_pool().clone());
    store.migrate().await.context("migration failed")?;
    manager.close_all().await;

    info!("Credential store migrations applied");
    output_success(&output_format, "Migrations applied", None)
}
