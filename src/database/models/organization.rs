use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Tenant record. The data store addresses point at the relational store
/// holding this tenant's operational data.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub sso_active: bool,
    #[serde(skip_serializing)]
    pub write_address: String,
    #[serde(skip_serializing)]
    pub read_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrganization {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub sso_active: bool,
    pub write_address: String,
    #[serde(default)]
    pub read_address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrganizationUpdate {
    pub name: Option<String>,
    pub sso_active: Option<bool>,
    pub write_address: Option<String>,
    /// `Some(None)` clears the read address.
    #[serde(default, with = "double_option")]
    pub read_address: Option<Option<String>>,
}

/// Membership edge between a platform user and an organization.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserOrganization {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

/// Per-tenant role, ordered by authority: `Member < Admin < Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantRole {
    Member,
    Admin,
    Owner,
}

impl TenantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantRole::Member => "member",
            TenantRole::Admin => "admin",
            TenantRole::Owner => "owner",
        }
    }

    pub fn satisfies(&self, required: TenantRole) -> bool {
        *self >= required
    }
}

impl fmt::Display for TenantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "member" => Ok(TenantRole::Member),
            "admin" => Ok(TenantRole::Admin),
            "owner" => Ok(TenantRole::Owner),
            other => Err(format!("unknown tenant role '{}'", other)),
        }
    }
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
