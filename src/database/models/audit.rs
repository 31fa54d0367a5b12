use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Immutable record of a sensitive action. `user_email` is kept even after
/// the user row is gone.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub user_email: Option<String>,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub user_id: Option<Uuid>,
    pub user_email: Option<String>,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub outcome: AuditOutcome,
    pub created_at: DateTime<Utc>,
}

impl NewAuditLog {
    pub fn new(action: impl Into<String>, resource: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self {
            user_id: None,
            user_email: None,
            action: action.into(),
            resource: resource.into(),
            resource_id: None,
            details: None,
            ip_address: None,
            user_agent: None,
            outcome,
            created_at: Utc::now(),
        }
    }

    pub fn actor(mut self, user_id: Option<Uuid>, email: Option<&str>) -> Self {
        self.user_id = user_id;
        self.user_email = email.map(str::to_string);
        self
    }

    pub fn resource_id(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn origin(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }
}

/// Half-open time window `[start, end)`; either side may be unbounded.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at < e)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<Uuid>,
    pub user_email: Option<String>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub resource_id: Option<String>,
    pub outcome: Option<AuditOutcome>,
    pub range: TimeRange,
    pub page: i64,
    pub size: i64,
}

impl AuditFilter {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.size)
    }

    pub fn matches(&self, entry: &AuditLog) -> bool {
        self.user_id.map_or(true, |id| entry.user_id == Some(id))
            && self
                .user_email
                .as_deref()
                .map_or(true, |email| entry.user_email.as_deref() == Some(email))
            && self.action.as_deref().map_or(true, |a| entry.action == a)
            && self.resource.as_deref().map_or(true, |r| entry.resource == r)
            && self
                .resource_id
                .as_deref()
                .map_or(true, |id| entry.resource_id.as_deref() == Some(id))
            && self.outcome.map_or(true, |o| entry.status == o.as_str())
            && self.range.contains(entry.created_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct CountBucket {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditStats {
    pub total: i64,
    pub by_action: Vec<CountBucket>,
    pub by_resource: Vec<CountBucket>,
    pub by_status: Vec<CountBucket>,
    pub top_users: Vec<CountBucket>,
    pub recent: Vec<AuditLog>,
}
