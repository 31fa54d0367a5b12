use anyhow::{bail, Context};
use clap::Subcommand;
use std::io::Read;

use super::org::resolve_user;
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::server::AppState;
use crate::services::Actor;

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a platform user
    Create {
        /// Email address (unique)
        email: String,

        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Password; read from stdin when omitted
        #[arg(long, env = "PORTAL_USER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Deactivate a user and revoke their sessions
    Deactivate {
        /// User UUID or email
        user: String,
    },
}

pub async fn handle(cmd: UserCommands, state: AppState, output_format: OutputFormat) -> anyhow::Result<()> {
    let actor = Actor::system();

    match cmd {
        UserCommands::Create { email, name, password } => {
            let password = match password {
                Some(password) => password,
                None => read_password_from_stdin()?,
            };
            let name = name.unwrap_or_else(|| email.clone());
            let user = state.accounts.create_user(&email, &name, &password, &actor).await?;
            output_success(
                &output_format,
                &format!("Created user {} ({})", user.email, user.id),
                Some(serde_json::to_value(&user)?),
            )
        }
        UserCommands::Deactivate { user } => {
            let user_id = resolve_user(&state, &user).await?;
            state.accounts.deactivate(user_id, &actor).await?;
            output_success(&output_format, &format!("Deactivated user {}", user), None)
        }
    }
}

fn read_password_from_stdin() -> anyhow::Result<String> {
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read password from stdin")?;
    let password = buffer.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("No password given: pass --password or pipe one on stdin");
    }
    Ok(password)
}
