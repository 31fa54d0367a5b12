use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Platform operator identity, stored in the central Credential Store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub is_active: bool,
    pub sso_provider: Option<String>,
    pub sso_subject: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: Option<String>,
    pub sso_provider: Option<String>,
    pub sso_subject: Option<String>,
}

impl User {
    /// Emails are matched case-insensitively; stored lowercased.
    pub fn normalize_email(email: &str) -> String {
        email.trim().to_lowercase()
    }
}
