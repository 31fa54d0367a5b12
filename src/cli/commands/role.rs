use anyhow::anyhow;
use clap::Subcommand;
use std::path::PathBuf;
use uuid::Uuid;

use super::org::resolve_user;
use crate::cli::utils::{output_list, output_success};
use crate::cli::OutputFormat;
use crate::server::AppState;
use crate::services::Actor;

#[derive(Subcommand)]
pub enum RoleCommands {
    /// List roles with their permissions
    List,

    /// Create a custom role
    Create {
        /// Unique role name
        name: String,

        /// Human readable name (defaults to the role name)
        #[arg(long)]
        display_name: Option<String>,
    },

    /// Grant a permission (resource:action) to a role
    Grant {
        /// Role UUID or name
        role: String,

        /// Permission as resource:action
        permission: String,
    },

    /// Assign a role to a user
    Assign {
        /// User UUID or email
        user: String,

        /// Role UUID or name
        role: String,
    },

    /// Create or update roles from a YAML seed file
    Seed {
        /// Path to the seed file
        file: PathBuf,
    },
}

pub async fn handle(cmd: RoleCommands, state: AppState, output_format: OutputFormat) -> anyhow::Result<()> {
    let actor = Actor::system();

    match cmd {
        RoleCommands::List => {
            let roles = state.roles.list().await?;
            output_list(&output_format, &roles, "No roles found", |entry| {
                let permissions: Vec<String> = entry.permissions.iter().map(ToString::to_string).collect();
                format!(
                    "{:<38} {:<20} {:<6} {}",
                    entry.role.id,
                    entry.role.name,
                    if entry.role.is_system { "system" } else { "" },
                    permissions.join(", ")
                )
            })
        }
        RoleCommands::Create { name, display_name } => {
            let display_name = display_name.unwrap_or_else(|| name.clone());
            let role = state.roles.create(&name, &display_name, &actor).await?;
            output_success(
                &output_format,
                &format!("Created role '{}' ({})", role.name, role.id),
                Some(serde_json::to_value(&role)?),
            )
        }
        RoleCommands::Grant { role, permission } => {
            let role_id = resolve_role(&state, &role).await?;
            let key = state.roles.grant(role_id, &permission, &actor).await?;
            output_success(&output_format, &format!("Granted {} to role {}", key, role), None)
        }
        RoleCommands::Assign { user, role } => {
            let user_id = resolve_user(&state, &user).await?;
            let role_id = resolve_role(&state, &role).await?;
            let added = state.roles.assign(user_id, role_id, &actor).await?;
            let message = if added {
                format!("Assigned role {} to {}", role, user)
            } else {
                format!("{} already holds role {}", user, role)
            };
            output_success(&output_format, &message, None)
        }
        RoleCommands::Seed { file } => {
            let roles = state.roles.seed_file(&file, &actor).await?;
            output_success(
                &output_format,
                &format!("Seeded {} role(s) from {}", roles.len(), file.display()),
                Some(serde_json::to_value(&roles)?),
            )
        }
    }
}

async fn resolve_role(state: &AppState, role: &str) -> anyhow::Result<Uuid> {
    if let Ok(id) = Uuid::parse_str(role) {
        return Ok(id);
    }
    state
        .roles
        .list()
        .await?
        .into_iter()
        .find(|entry| entry.role.name == role)
        .map(|entry| entry.role.id)
        .ok_or_else(|| anyhow!("Role '{}' not found", role))
}
