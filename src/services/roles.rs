use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::database::models::{AuditOutcome, NewRole, PermissionKey, Role, RoleWithPermissions};
use crate::database::{DatabaseError, RoleRepository};
use crate::services::audit::AuditRecorder;
use crate::services::Actor;

#[derive(Debug, Error)]
pub enum RoleAdminError {
    #[error("Role not found")]
    RoleNotFound,

    #[error("Role '{0}' already exists")]
    DuplicateRole(String),

    #[error("System role '{0}' cannot be deleted")]
    SystemRole(String),

    #[error("Invalid permission '{0}', expected resource:action")]
    InvalidPermission(String),

    #[error("Invalid role seed: {0}")]
    InvalidSeed(String),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// One entry of a YAML role seed file:
///
/// ```yaml
/// - name: operator
///   display_name: Operator
///   permissions: [integration:read, integration:write]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RoleSeed {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Platform role administration. Every change is audited.
pub struct RoleAdmin {
    roles: Arc<dyn RoleRepository>,
    audit: Arc<AuditRecorder>,
}

impl RoleAdmin {
    pub fn new(roles: Arc<dyn RoleRepository>, audit: Arc<AuditRecorder>) -> Self {
        Self { roles, audit }
    }

    pub async fn list(&self) -> Result<Vec<RoleWithPermissions>, RoleAdminError> {
        Ok(self.roles.list_roles().await?)
    }

    pub async fn create(&self, name: &str, display_name: &str, actor: &Actor) -> Result<Role, RoleAdminError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RoleAdminError::InvalidSeed("role name is required".to_string()));
        }
        let role = self
            .roles
            .create_role(NewRole {
                name: name.to_string(),
                display_name: display_name.to_string(),
                is_system: false,
            })
            .await
            .map_err(|e| match e {
                DatabaseError::Conflict(_) => RoleAdminError::DuplicateRole(name.to_string()),
                other => other.into(),
            })?;
        self.audit
            .record(
                actor
                    .entry("create", "role", AuditOutcome::Success)
                    .resource_id(role.id)
                    .details(json!({ "name": role.name })),
            )
            .await;
        Ok(role)
    }

    pub async fn delete(&self, role_id: Uuid, actor: &Actor) -> Result<(), RoleAdminError> {
        let role = self.find(role_id).await?;
        if role.is_system {
            return Err(RoleAdminError::SystemRole(role.name));
        }
        if !self.roles.delete_role(role_id).await? {
            return Err(RoleAdminError::RoleNotFound);
        }
        self.audit
            .record(
                actor
                    .entry("delete", "role", AuditOutcome::Success)
                    .resource_id(role_id)
                    .details(json!({ "name": role.name })),
            )
            .await;
        Ok(())
    }

    /// Replace the full permission set of a role in one transaction.
    pub async fn replace_permissions(
        &self,
        role_id: Uuid,
        permissions: &[String],
        actor: &Actor,
    ) -> Result<Vec<PermissionKey>, RoleAdminError> {
        self.find(role_id).await?;
        let mut keys = parse_permissions(permissions)?;
        keys.sort();
        keys.dedup();
        self.roles.replace_role_permissions(role_id, &keys).await?;
        self.audit
            .record(
                actor
                    .entry("replace_permissions", "role", AuditOutcome::Success)
                    .resource_id(role_id)
                    .details(json!({ "permissions": keys.iter().map(ToString::to_string).collect::<Vec<_>>() })),
            )
            .await;
        Ok(keys)
    }

    /// Add one permission to a role, keeping existing grants.
    pub async fn grant(&self, role_id: Uuid, permission: &str, actor: &Actor) -> Result<PermissionKey, RoleAdminError> {
        self.find(role_id).await?;
        let key = PermissionKey::parse(permission).ok_or_else(|| RoleAdminError::InvalidPermission(permission.to_string()))?;
        self.roles.grant_permission(role_id, &key).await?;
        self.audit
            .record(
                actor
                    .entry("grant_permission", "role", AuditOutcome::Success)
                    .resource_id(role_id)
                    .details(json!({ "permission": key.to_string() })),
            )
            .await;
        Ok(key)
    }

    pub async fn assign(&self, user_id: Uuid, role_id: Uuid, actor: &Actor) -> Result<bool, RoleAdminError> {
        self.find(role_id).await?;
        let added = self.roles.assign_role(user_id, role_id).await?;
        self.audit
            .record(
                actor
                    .entry("assign_role", "user", AuditOutcome::Success)
                    .resource_id(user_id)
                    .details(json!({ "role_id": role_id })),
            )
            .await;
        Ok(added)
    }

    pub async fn revoke(&self, user_id: Uuid, role_id: Uuid, actor: &Actor) -> Result<bool, RoleAdminError> {
        let removed = self.roles.revoke_role(user_id, role_id).await?;
        if removed {
            self.audit
                .record(
                    actor
                        .entry("revoke_role", "user", AuditOutcome::Success)
                        .resource_id(user_id)
                        .details(json!({ "role_id": role_id })),
                )
                .await;
        }
        Ok(removed)
    }

    /// Create missing roles and add the listed permissions to each. Existing
    /// grants are kept; seeding twice is a no-op.
    pub async fn seed(&self, seeds: &[RoleSeed], actor: &Actor) -> Result<Vec<Role>, RoleAdminError> {
        let mut seeded = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let keys = parse_permissions(&seed.permissions)?;
            let role = match self.roles.find_role_by_name(&seed.name).await? {
                Some(role) => role,
                None => {
                    let display = seed.display_name.as_deref().unwrap_or(&seed.name);
                    self.create(&seed.name, display, actor).await?
                }
            };
            for key in &keys {
                self.roles.grant_permission(role.id, key).await?;
            }
            info!(role = %role.name, permissions = keys.len(), "Seeded role");
            seeded.push(role);
        }
        Ok(seeded)
    }

    pub async fn seed_file(&self, path: &Path, actor: &Actor) -> Result<Vec<Role>, RoleAdminError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RoleAdminError::InvalidSeed(format!("{}: {}", path.display(), e)))?;
        let seeds = parse_seed(&raw)?;
        self.seed(&seeds, actor).await
    }

    async fn find(&self, role_id: Uuid) -> Result<Role, RoleAdminError> {
        self.roles.find_role(role_id).await?.ok_or(RoleAdminError::RoleNotFound)
    }
}

pub fn parse_seed(raw: &str) -> Result<Vec<RoleSeed>, RoleAdminError> {
    serde_yaml::from_str(raw).map_err(|e| RoleAdminError::InvalidSeed(e.to_string()))
}

fn parse_permissions(raw: &[String]) -> Result<Vec<PermissionKey>, RoleAdminError> {
    raw.iter()
        .map(|p| PermissionKey::parse(p).ok_or_else(|| RoleAdminError::InvalidPermission(p.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::database::MemoryStore;

    fn admin() -> (Arc<MemoryStore>, RoleAdmin) {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(AuditRecorder::new(store.clone(), &AppConfig::development().audit));
        (store.clone(), RoleAdmin::new(store, audit))
    }

    #[tokio::test]
    async fn system_roles_cannot_be_deleted() {
        let (store, admin) = admin();
        let member = store.find_role_by_name("member").await.unwrap().unwrap();
        assert!(matches!(
            admin.delete(member.id, &Actor::system()).await,
            Err(RoleAdminError::SystemRole(_))
        ));
    }

    #[tokio::test]
    async fn replace_swaps_the_whole_set() {
        let (_, admin) = admin();
        let actor = Actor::system();
        let role = admin.create("ops", "Ops", &actor).await.unwrap();
        admin.grant(role.id, "audit:read", &actor).await.unwrap();

        let keys = admin
            .replace_permissions(role.id, &["integration:write".to_string(), "integration:write".to_string()], &actor)
            .await
            .unwrap();
        assert_eq!(keys, vec![PermissionKey::new("integration", "write")]);

        let listed = admin.list().await.unwrap();
        let ops = listed.iter().find(|r| r.role.name == "ops").unwrap();
        assert_eq!(ops.permissions, keys);
    }

    #[tokio::test]
    async fn rejects_malformed_permission() {
        let (_, admin) = admin();
        let actor = Actor::system();
        let role = admin.create("ops", "Ops", &actor).await.unwrap();
        assert!(matches!(
            admin.grant(role.id, "integration", &actor).await,
            Err(RoleAdminError::InvalidPermission(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_role_conflicts() {
        let (_, admin) = admin();
        let actor = Actor::system();
        admin.create("ops", "Ops", &actor).await.unwrap();
        assert!(matches!(
            admin.create("ops", "Ops again", &actor).await,
            Err(RoleAdminError::DuplicateRole(_))
        ));
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let (_, admin) = admin();
        let seeds = parse_seed(
            "- name: operator\n  display_name: Operator\n  permissions: [\"integration:read\", \"integration:write\"]\n- name: auditor\n  permissions: [\"audit:read\"]\n",
        )
        .unwrap();
        let actor = Actor::system();
        let first = admin.seed(&seeds, &actor).await.unwrap();
        let second = admin.seed(&seeds, &actor).await.unwrap();
        assert_eq!(first[0].id, second[0].id);

        let listed = admin.list().await.unwrap();
        let operator = listed.iter().find(|r| r.role.name == "operator").unwrap();
        assert_eq!(operator.permissions.len(), 2);
        assert_eq!(operator.role.display_name, "Operator");
    }
}
