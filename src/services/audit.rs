use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::AuditConfig;
use crate::database::models::{AuditFilter, AuditLog, AuditStats, NewAuditLog, TimeRange};
use crate::database::{AuditDimension, AuditRepository, DatabaseError};

#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub entries: Vec<AuditLog>,
    pub total: i64,
    pub page: i64,
    pub size: i64,
}

/// Appends audit entries and answers queries over them. Recording never fails
/// the caller; write failures go to the log instead.
pub struct AuditRecorder {
    repo: Arc<dyn AuditRepository>,
    enabled: bool,
    write_timeout: Duration,
    top_n: i64,
    max_page_size: i64,
}

impl AuditRecorder {
    pub fn new(repo: Arc<dyn AuditRepository>, config: &AuditConfig) -> Self {
        Self {
            repo,
            enabled: config.enable_audit_logging,
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            top_n: config.stats_top_n.max(1),
            max_page_size: config.max_page_size.max(1),
        }
    }

    pub async fn record(&self, entry: NewAuditLog) {
        if !self.enabled {
            return;
        }
        let action = entry.action.clone();
        let resource = entry.resource.clone();
        let outcome = entry.outcome;

        match tokio::time::timeout(self.write_timeout, self.repo.insert_audit_log(entry)).await {
            Ok(Ok(())) => debug!(%action, %resource, %outcome, "Audit entry recorded"),
            Ok(Err(e)) => error!(%action, %resource, %outcome, error = %e, "Failed to record audit entry"),
            Err(_) => error!(%action, %resource, %outcome, "Timed out recording audit entry"),
        }
    }

    pub async fn query(&self, mut filter: AuditFilter) -> Result<AuditPage, DatabaseError> {
        filter.page = filter.page.max(1);
        filter.size = filter.size.clamp(1, self.max_page_size);
        let (entries, total) = self.repo.query_audit_logs(&filter).await?;
        Ok(AuditPage {
            entries,
            total,
            page: filter.page,
            size: filter.size,
        })
    }

    pub async fn stats(&self, range: TimeRange) -> Result<AuditStats, DatabaseError> {
        let top = Some(self.top_n);
        let (total, by_action, by_resource, by_status, top_users, recent) = futures::try_join!(
            self.repo.count_audit_logs(range),
            self.repo.audit_counts_by(AuditDimension::Action, range, None),
            self.repo.audit_counts_by(AuditDimension::Resource, range, None),
            self.repo.audit_counts_by(AuditDimension::Status, range, None),
            self.repo.audit_counts_by(AuditDimension::Actor, range, top),
            self.repo.recent_audit_logs(range, self.top_n),
        )?;

        Ok(AuditStats {
            total,
            by_action,
            by_resource,
            by_status,
            top_users,
            recent,
        })
    }

    /// Stats over the trailing `days`.
    pub async fn stats_for_days(&self, days: i64) -> Result<AuditStats, DatabaseError> {
        self.stats(TimeRange {
            start: Some(Utc::now() - ChronoDuration::days(days.max(0))),
            end: None,
        })
        .await
    }

    /// Irreversibly delete entries created before `older_than`.
    pub async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let removed = self.repo.prune_audit_logs(older_than).await?;
        info!(removed, cutoff = %older_than, "Pruned audit log");
        Ok(removed)
    }

    pub async fn prune_older_than_days(&self, days: i64) -> Result<u64, DatabaseError> {
        self.prune(Utc::now() - ChronoDuration::days(days.max(0))).await
    }
}
