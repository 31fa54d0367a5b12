use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::models::{
    AuditOutcome, NewOrganization, Organization, OrganizationUpdate, TenantRole, UserOrganization,
};
use crate::database::manager::validate_address;
use crate::database::{DatabaseError, OrganizationRepository};
use crate::services::audit::AuditRecorder;
use crate::services::Actor;

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("Organization identifier is required")]
    OrganizationRequired,

    #[error("Organization identifier must be a UUID")]
    InvalidIdentifier,

    #[error("Organization not found")]
    OrganizationNotFound,

    #[error("Not a member of this organization")]
    NotAMember,

    #[error("No data store configured for organization")]
    NoDataStoreConfigured,

    #[error("Invalid data store address")]
    InvalidStoreAddress,

    #[error("Organization still has {0} member(s)")]
    HasMembers(i64),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// Resolves organizations and memberships. Every lookup goes to the
/// Credential Store; nothing is cached in process.
pub struct TenantRegistry {
    orgs: Arc<dyn OrganizationRepository>,
    audit: Arc<AuditRecorder>,
}

impl TenantRegistry {
    pub fn new(orgs: Arc<dyn OrganizationRepository>, audit: Arc<AuditRecorder>) -> Self {
        Self { orgs, audit }
    }

    pub fn parse_identifier(identifier: &str) -> Result<Uuid, TenantError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(TenantError::OrganizationRequired);
        }
        Uuid::parse_str(identifier).map_err(|_| TenantError::InvalidIdentifier)
    }

    pub async fn resolve_organization(&self, identifier: &str) -> Result<Organization, TenantError> {
        let id = Self::parse_identifier(identifier)?;
        self.find(id).await
    }

    pub async fn find(&self, id: Uuid) -> Result<Organization, TenantError> {
        self.orgs
            .find_organization(id)
            .await?
            .ok_or(TenantError::OrganizationNotFound)
    }

    /// Tenant role of `user_id` in `organization_id`. No edge means no access;
    /// an unrecognised role string is treated the same way.
    pub async fn resolve_membership(&self, user_id: Uuid, organization_id: Uuid) -> Result<TenantRole, TenantError> {
        let edge = self
            .orgs
            .find_membership(user_id, organization_id)
            .await?
            .ok_or(TenantError::NotAMember)?;
        edge.role.parse::<TenantRole>().map_err(|e| {
            warn!(user_id = %user_id, organization = %organization_id, error = %e, "Unrecognised tenant role");
            TenantError::NotAMember
        })
    }

    pub async fn memberships(&self, user_id: Uuid) -> Result<Vec<UserOrganization>, TenantError> {
        Ok(self.orgs.list_memberships_for_user(user_id).await?)
    }

    pub async fn count_members(&self, organization_id: Uuid) -> Result<i64, TenantError> {
        Ok(self.orgs.count_members(organization_id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Organization>, TenantError> {
        Ok(self.orgs.list_organizations().await?)
    }

    pub async fn create(&self, org: NewOrganization, actor: &Actor) -> Result<Organization, TenantError> {
        validate_store_addresses(Some(&org.write_address), org.read_address.as_deref())?;
        let created = self.orgs.create_organization(org).await?;
        info!(organization = %created.id, "Created organization");
        self.audit
            .record(
                actor
                    .entry("create", "organization", AuditOutcome::Success)
                    .resource_id(created.id)
                    .details(json!({ "name": created.name })),
            )
            .await;
        Ok(created)
    }

    pub async fn update(&self, id: Uuid, update: OrganizationUpdate, actor: &Actor) -> Result<Organization, TenantError> {
        validate_store_addresses(
            update.write_address.as_deref(),
            update.read_address.as_ref().and_then(|r| r.as_deref()),
        )?;
        let updated = self
            .orgs
            .update_organization(id, update)
            .await?
            .ok_or(TenantError::OrganizationNotFound)?;
        self.audit
            .record(actor.entry("update", "organization", AuditOutcome::Success).resource_id(id))
            .await;
        Ok(updated)
    }

    /// Refused while any membership edge remains.
    pub async fn delete(&self, id: Uuid, actor: &Actor) -> Result<(), TenantError> {
        self.find(id).await?;
        let members = self.orgs.count_members(id).await?;
        if members > 0 {
            return Err(TenantError::HasMembers(members));
        }
        if !self.orgs.delete_organization(id).await? {
            // a member was added between the count and the delete
            let members = self.orgs.count_members(id).await?;
            return Err(if members > 0 {
                TenantError::HasMembers(members)
            } else {
                TenantError::OrganizationNotFound
            });
        }
        info!(organization = %id, "Deleted organization");
        self.audit
            .record(actor.entry("delete", "organization", AuditOutcome::Success).resource_id(id))
            .await;
        Ok(())
    }

    pub async fn add_member(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role: TenantRole,
        actor: &Actor,
    ) -> Result<UserOrganization, TenantError> {
        self.find(organization_id).await?;
        let edge = self.orgs.upsert_membership(user_id, organization_id, role).await?;
        self.audit
            .record(
                actor
                    .entry("add_member", "organization", AuditOutcome::Success)
                    .resource_id(organization_id)
                    .details(json!({ "user_id": user_id, "role": role })),
            )
            .await;
        Ok(edge)
    }

    pub async fn remove_member(&self, organization_id: Uuid, user_id: Uuid, actor: &Actor) -> Result<bool, TenantError> {
        let removed = self.orgs.remove_membership(user_id, organization_id).await?;
        if removed {
            self.audit
                .record(
                    actor
                        .entry("remove_member", "organization", AuditOutcome::Success)
                        .resource_id(organization_id)
                        .details(json!({ "user_id": user_id })),
                )
                .await;
        }
        Ok(removed)
    }
}

fn validate_store_addresses(write: Option<&str>, read: Option<&str>) -> Result<(), TenantError> {
    for address in [write, read].into_iter().flatten() {
        if !address.trim().is_empty() && validate_address(address.trim()).is_err() {
            return Err(TenantError::InvalidStoreAddress);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::database::models::NewUser;
    use crate::database::{MemoryStore, UserRepository};

    async fn setup() -> (Arc<MemoryStore>, TenantRegistry) {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(AuditRecorder::new(store.clone(), &AppConfig::development().audit));
        (store.clone(), TenantRegistry::new(store, audit))
    }

    async fn user(store: &MemoryStore, email: &str) -> Uuid {
        store
            .create_user(NewUser {
                email: email.to_string(),
                name: email.to_string(),
                password_hash: None,
                sso_provider: None,
                sso_subject: None,
            })
            .await
            .unwrap()
            .id
    }

    fn new_org(name: &str) -> NewOrganization {
        NewOrganization {
            id: None,
            name: name.to_string(),
            sso_active: false,
            write_address: "postgres://localhost/tenants".to_string(),
            read_address: None,
        }
    }

    #[tokio::test]
    async fn membership_exists_iff_edge_exists() {
        let (store, registry) = setup().await;
        let actor = Actor::system();
        let users = [user(&store, "a@x.com").await, user(&store, "b@x.com").await];
        let org_a = registry.create(new_org("A"), &actor).await.unwrap();
        let org_b = registry.create(new_org("B"), &actor).await.unwrap();

        registry.add_member(org_a.id, users[0], TenantRole::Owner, &actor).await.unwrap();
        registry.add_member(org_b.id, users[1], TenantRole::Member, &actor).await.unwrap();

        for u in users {
            for org in [org_a.id, org_b.id] {
                let edge = store.find_membership(u, org).await.unwrap();
                let resolved = registry.resolve_membership(u, org).await;
                match edge {
                    Some(edge) => assert_eq!(resolved.unwrap().as_str(), edge.role),
                    None => assert!(matches!(resolved, Err(TenantError::NotAMember))),
                }
            }
        }
    }

    #[tokio::test]
    async fn resolve_distinguishes_missing_and_malformed() {
        let (_, registry) = setup().await;
        assert!(matches!(
            registry.resolve_organization(&Uuid::new_v4().to_string()).await,
            Err(TenantError::OrganizationNotFound)
        ));
        assert!(matches!(
            registry.resolve_organization("not-a-uuid").await,
            Err(TenantError::InvalidIdentifier)
        ));
        assert!(matches!(
            registry.resolve_organization("  ").await,
            Err(TenantError::OrganizationRequired)
        ));
    }

    #[tokio::test]
    async fn delete_refused_while_members_remain() {
        let (store, registry) = setup().await;
        let actor = Actor::system();
        let u = user(&store, "a@x.com").await;
        let org = registry.create(new_org("A"), &actor).await.unwrap();
        registry.add_member(org.id, u, TenantRole::Member, &actor).await.unwrap();

        assert!(matches!(registry.delete(org.id, &actor).await, Err(TenantError::HasMembers(1))));
        registry.remove_member(org.id, u, &actor).await.unwrap();
        registry.delete(org.id, &actor).await.unwrap();
        assert!(matches!(registry.find(org.id).await, Err(TenantError::OrganizationNotFound)));
    }

    #[tokio::test]
    async fn rejects_non_postgres_store_address() {
        let (_, registry) = setup().await;
        let mut org = new_org("A");
        org.write_address = "file:///tmp/x".to_string();
        assert!(matches!(
            registry.create(org, &Actor::system()).await,
            Err(TenantError::InvalidStoreAddress)
        ));
    }
}
