use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::server::AppState;

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Delete expired sessions and password reset tokens
    Sweep,
}

pub async fn handle(cmd: SessionCommands, state: AppState, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        SessionCommands::Sweep => {
            let sessions = state.sessions.delete_expired_sessions().await?;
            let reset_tokens = state.accounts.delete_expired_reset_tokens().await?;
            output_success(
                &output_format,
                &format!("Removed {} expired session(s) and {} reset token(s)", sessions, reset_tokens),
                Some(json!({ "sessions": sessions, "reset_tokens": reset_tokens })),
            )
        }
    }
}
