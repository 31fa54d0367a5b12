use anyhow::{anyhow, Context};
use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::cli::utils::{output_list, output_success, output_value};
use crate::cli::OutputFormat;
use crate::database::models::{NewOrganization, TenantRole};
use crate::server::AppState;
use crate::services::Actor;

#[derive(Subcommand)]
pub enum OrgCommands {
    /// List all organizations
    List,

    /// Create a new organization
    Create {
        /// Display name
        name: String,

        /// Primary data store address (postgres://...)
        #[arg(long)]
        write_address: String,

        /// Optional read replica address
        #[arg(long)]
        read_address: Option<String>,

        /// Explicit organization UUID
        #[arg(long)]
        id: Option<Uuid>,

        /// Mark the organization as using single sign-on
        #[arg(long)]
        sso: bool,
    },

    /// Delete an organization with no remaining members
    Delete {
        /// Organization UUID
        id: Uuid,
    },

    /// Create the tenant-local namespace and tables
    Provision {
        /// Organization UUID
        id: Uuid,
    },

    /// Add or update a member of an organization
    AddMember {
        /// Organization UUID
        id: Uuid,

        /// User UUID or email
        user: String,

        /// Tenant role: member, admin or owner
        #[arg(long, default_value = "member")]
        role: String,
    },
}

pub async fn handle(cmd: OrgCommands, state: AppState, output_format: OutputFormat) -> anyhow::Result<()> {
    let actor = Actor::system();

    match cmd {
        OrgCommands::List => {
            let orgs = state.tenants.list().await?;
            output_list(&output_format, &orgs, "No organizations found", |org| {
                format!(
                    "{:<38} {:<30} {}",
                    org.id,
                    org.name,
                    if org.sso_active { "sso" } else { "" }
                )
            })
        }
        OrgCommands::Create {
            name,
            write_address,
            read_address,
            id,
            sso,
        } => {
            let org = state
                .tenants
                .create(
                    NewOrganization {
                        id,
                        name,
                        sso_active: sso,
                        write_address,
                        read_address,
                    },
                    &actor,
                )
                .await?;
            output_success(
                &output_format,
                &format!("Created organization '{}' ({})", org.name, org.id),
                Some(serde_json::to_value(&org)?),
            )
        }
        OrgCommands::Delete { id } => {
            state.tenants.delete(id, &actor).await?;
            output_success(&output_format, &format!("Deleted organization {}", id), None)
        }
        OrgCommands::Provision { id } => {
            let org = state.tenants.find(id).await?;
            state.tenant_router.provision(&org, &actor).await?;
            output_success(&output_format, &format!("Provisioned organization {}", id), None)
        }
        OrgCommands::AddMember { id, user, role } => {
            let role: TenantRole = role.parse().map_err(|e| anyhow!("{}", e))?;
            let user_id = resolve_user(&state, &user).await?;
            let edge = state.tenants.add_member(id, user_id, role, &actor).await?;
            match output_format {
                OutputFormat::Json => output_value(&output_format, &json!({ "success": true, "data": edge })),
                OutputFormat::Text => output_success(
                    &output_format,
                    &format!("User {} is now {} of organization {}", user_id, edge.role, id),
                    None,
                ),
            }
        }
    }
}

/// Accept either a user UUID or an email address.
pub(crate) async fn resolve_user(state: &AppState, user: &str) -> anyhow::Result<Uuid> {
    if let Ok(id) = Uuid::parse_str(user) {
        return Ok(id);
    }
    state
        .users
        .find_user_by_email(user)
        .await
        .context("failed to look up user")?
        .map(|u| u.id)
        .ok_or_else(|| anyhow!("User '{}' not found", user))
}
