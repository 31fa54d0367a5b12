use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Named bundle of permissions. System roles cannot be deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub display_name: String,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub id: Uuid,
    pub resource: String,
    pub action: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub is_system: bool,
}

/// A `(resource, action)` pair without a row identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionKey {
    pub resource: String,
    pub action: String,
}

impl PermissionKey {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Parse the `resource:action` shorthand used by the CLI and seed files.
    pub fn parse(raw: &str) -> Option<Self> {
        let (resource, action) = raw.split_once(':')?;
        let (resource, action) = (resource.trim(), action.trim());
        if resource.is_empty() || action.is_empty() {
            return None;
        }
        Some(Self::new(resource, action))
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

/// One row of the user -> role -> permission join. A role with no permissions
/// still yields a grant with `permission: None` so the role name is visible.
#[derive(Debug, Clone)]
pub struct RoleGrant {
    pub role_name: String,
    pub permission: Option<PermissionKey>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleWithPermissions {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<PermissionKey>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shorthand() {
        let key = PermissionKey::parse("integration:write").unwrap();
        assert_eq!(key.resource, "integration");
        assert_eq!(key.action, "write");
        assert_eq!(key.to_string(), "integration:write");
    }

    #[test]
    fn rejects_incomplete_shorthand() {
        assert!(PermissionKey::parse("integration").is_none());
        assert!(PermissionKey::parse(":write").is_none());
        assert!(PermissionKey::parse("integration: ").is_none());
    }
}
