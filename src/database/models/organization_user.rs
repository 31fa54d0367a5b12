use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Tenant-local user record, persisted in the organization's own namespace.
/// Distinct from the platform `User`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrganizationUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub is_active: bool,
    pub sso_subject: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrganizationUser {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub sso_subject: Option<String>,
}
