use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::database::models::{RoleGrant, TenantRole};
use crate::database::{DatabaseError, RoleRepository};

pub const ADMIN_ROLE: &str = "admin";
pub const MANAGE_ACTION: &str = "manage";

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("Missing permission {resource}:{action}")]
    PermissionDenied { resource: String, action: String },

    #[error("Requires organization role {required}")]
    InsufficientTenantRole { required: TenantRole, actual: TenantRole },

    #[error("Authorization lookup failed: {0}")]
    Lookup(#[from] DatabaseError),
}

/// A user's roles and the union of `(resource, action)` grants they carry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PermissionSet {
    roles: BTreeSet<String>,
    permissions: BTreeMap<String, BTreeSet<String>>,
}

impl PermissionSet {
    pub fn from_grants(grants: impl IntoIterator<Item = RoleGrant>) -> Self {
        let mut set = Self::default();
        for grant in grants {
            set.roles.insert(grant.role_name);
            if let Some(key) = grant.permission {
                set.permissions.entry(key.resource).or_default().insert(key.action);
            }
        }
        set
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// `resource -> actions`, duplicates collapsed.
    pub fn permissions(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.permissions
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(ADMIN_ROLE)
    }

    /// True when `action` or the `manage` wildcard is granted on `resource`,
    /// or when the holder is an admin.
    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        if self.is_admin() {
            return true;
        }
        self.permissions
            .get(resource)
            .map_or(false, |actions| actions.contains(action) || actions.contains(MANAGE_ACTION))
    }
}

/// Answers point-in-time permission questions against the Credential Store.
/// Nothing is cached, so role changes apply to the very next request.
pub struct AuthorizationEngine {
    roles: Arc<dyn RoleRepository>,
}

impl AuthorizationEngine {
    pub fn new(roles: Arc<dyn RoleRepository>) -> Self {
        Self { roles }
    }

    pub async fn effective_permissions(&self, user_id: Uuid) -> Result<PermissionSet, DatabaseError> {
        let grants = self.roles.role_grants_for_user(user_id).await?;
        Ok(PermissionSet::from_grants(grants))
    }

    /// Resolve the caller's permissions and require `resource:action`. A failed
    /// lookup denies.
    pub async fn authorize(&self, user_id: Uuid, resource: &str, action: &str) -> Result<PermissionSet, AuthzError> {
        let permissions = self.effective_permissions(user_id).await.map_err(|e| {
            warn!(user_id = %user_id, resource, action, error = %e, "Permission lookup failed; denying");
            AuthzError::Lookup(e)
        })?;

        if permissions.has_permission(resource, action) {
            Ok(permissions)
        } else {
            warn!(user_id = %user_id, resource, action, "Permission denied");
            Err(AuthzError::PermissionDenied {
                resource: resource.to_string(),
                action: action.to_string(),
            })
        }
    }

    /// Tenant role check, independent of platform permissions.
    pub fn require_tenant_role(actual: TenantRole, required: TenantRole) -> Result<(), AuthzError> {
        if actual.satisfies(required) {
            Ok(())
        } else {
            Err(AuthzError::InsufficientTenantRole { required, actual })
        }
    }
}
