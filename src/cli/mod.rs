pub mod commands;
pub mod utils;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::server::AppState;
use crate::services::IntegrationRegistry;

#[derive(Parser)]
#[command(name = "portal")]
#[command(about = "Portal CLI - operate the portal credential store and tenants")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Apply credential store migrations")]
    Migrate,

    #[command(about = "Run the HTTP server")]
    Serve,

    #[command(about = "Organization (tenant) administration")]
    Org {
        #[command(subcommand)]
        cmd: commands::org::OrgCommands,
    },

    #[command(about = "Platform role administration")]
    Role {
        #[command(subcommand)]
        cmd: commands::role::RoleCommands,
    },

    #[command(about = "Platform user administration")]
    User {
        #[command(subcommand)]
        cmd: commands::user::UserCommands,
    },

    #[command(about = "Session maintenance")]
    Sessions {
        #[command(subcommand)]
        cmd: commands::sessions::SessionCommands,
    },

    #[command(about = "Audit log retention and statistics")]
    Audit {
        #[command(subcommand)]
        cmd: commands::audit::AuditCommands,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Open the configured stores with every service wired up.
pub async fn open_state(config: AppConfig) -> anyhow::Result<AppState> {
    AppState::from_config(config, IntegrationRegistry::new())
        .await
        .context("failed to open the credential store")
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let config = crate::config::config().clone();
    config.validate().context("invalid configuration")?;

    match cli.command {
        Commands::Migrate => commands::migrate::handle(config, output_format).await,
        Commands::Serve => {
            let state = open_state(config).await?;
            crate::server::serve(state).await.context("server error")
        }
        Commands::Org { cmd } => commands::org::handle(cmd, open_state(config).await?, output_format).await,
        Commands::Role { cmd } => commands::role::handle(cmd, open_state(config).await?, output_format).await,
        Commands::User { cmd } => commands::user::handle(cmd, open_state(config).await?, output_format).await,
        Commands::Sessions { cmd } => {
            commands::sessions::handle(cmd, open_state(config).await?, output_format).await
        }
        Commands::Audit { cmd } => commands::audit::handle(cmd, open_state(config).await?, output_format).await,
    }
}
