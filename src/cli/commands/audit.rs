use anyhow::bail;
use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::{output_success, output_value};
use crate::cli::OutputFormat;
use crate::database::models::CountBucket;
use crate::server::AppState;

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Delete audit entries older than N days
    Prune {
        #[arg(long)]
        days: i64,
    },

    /// Summarize the last N days of audit entries
    Stats {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
}

pub async fn handle(cmd: AuditCommands, state: AppState, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        AuditCommands::Prune { days } => {
            if days < 1 {
                bail!("--days must be at least 1");
            }
            let removed = state.audit.prune_older_than_days(days).await?;
            output_success(
                &output_format,
                &format!("Removed {} audit entr{} older than {} day(s)", removed, if removed == 1 { "y" } else { "ies" }, days),
                Some(json!({ "removed": removed })),
            )
        }
        AuditCommands::Stats { days } => {
            if days < 1 {
                bail!("--days must be at least 1");
            }
            let stats = state.audit.stats_for_days(days).await?;
            if let OutputFormat::Json = output_format {
                return output_value(&output_format, &stats);
            }

            println!("Audit entries in the last {} day(s): {}", days, stats.total);
            print_buckets("By action", &stats.by_action);
            print_buckets("By resource", &stats.by_resource);
            print_buckets("By status", &stats.by_status);
            print_buckets("Top users", &stats.top_users);
            Ok(())
        }
    }
}

fn print_buckets(title: &str, buckets: &[CountBucket]) {
    if buckets.is_empty() {
        return;
    }
    println!();
    println!("{}:", title);
    for bucket in buckets {
        println!("  {:<40} {:>8}", bucket.key, bucket.count);
    }
}
