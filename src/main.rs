use anyhow::Context;
use portal_api_rust::config;
use portal_api_rust::server::{self, AppState};
use portal_api_rust::services::IntegrationRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();
    portal_api_rust::init_tracing();

    let config = config::config().clone();
    config.validate().context("invalid configuration")?;
    tracing::info!("Starting Portal API in {:?} mode", config.environment);

    let state = AppState::from_config(config, IntegrationRegistry::new())
        .await
        .context("failed to open the credential store")?;
    server::serve(state).await.context("server error")?;
    Ok(())
}
