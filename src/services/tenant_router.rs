use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::database::models::{AuditOutcome, NewOrganizationUser, Organization, OrganizationUser};
use crate::database::{OrganizationUserRepository, TenantNamespace, TenantScope};
use crate::services::audit::AuditRecorder;
use crate::services::tenant_registry::TenantError;
use crate::services::Actor;

/// Pick the store address for a tenant: write address, else read address.
pub fn select_address(org: &Organization) -> Result<&str, TenantError> {
    let write = org.write_address.trim();
    if !write.is_empty() {
        return Ok(write);
    }
    match org.read_address.as_deref().map(str::trim) {
        Some(read) if !read.is_empty() => Ok(read),
        _ => Err(TenantError::NoDataStoreConfigured),
    }
}

/// Scope every tenant-scoped operation must carry.
pub fn scope_for(org: &Organization) -> Result<TenantScope, TenantError> {
    let address = select_address(org)?.to_string();
    Ok(TenantScope {
        organization_id: org.id,
        namespace: TenantNamespace::for_organization(org.id),
        address,
    })
}

/// The single path into tenant data. Handlers never see a store address or
/// namespace; they pass the resolved organization.
pub struct TenantRouter {
    directory: Arc<dyn OrganizationUserRepository>,
    audit: Arc<AuditRecorder>,
}

impl TenantRouter {
    pub fn new(directory: Arc<dyn OrganizationUserRepository>, audit: Arc<AuditRecorder>) -> Self {
        Self { directory, audit }
    }

    /// Create the tenant namespace and its tables.
    pub async fn provision(&self, org: &Organization, actor: &Actor) -> Result<(), TenantError> {
        let scope = scope_for(org)?;
        self.directory.provision_namespace(&scope).await?;
        self.audit
            .record(
                actor
                    .entry("provision", "organization", AuditOutcome::Success)
                    .resource_id(org.id)
                    .details(json!({ "namespace": scope.namespace.name() })),
            )
            .await;
        Ok(())
    }

    pub async fn list_users(
        &self,
        org: &Organization,
        page: i64,
        size: i64,
    ) -> Result<(Vec<OrganizationUser>, i64), TenantError> {
        let scope = scope_for(org)?;
        debug!(organization = %org.id, namespace = scope.namespace.name(), "Listing tenant users");
        Ok(self.directory.list_organization_users(&scope, page.max(1), size.max(1)).await?)
    }

    pub async fn get_user(&self, org: &Organization, id: Uuid) -> Result<Option<OrganizationUser>, TenantError> {
        let scope = scope_for(org)?;
        Ok(self.directory.find_organization_user(&scope, id).await?)
    }

    pub async fn create_user(
        &self,
        org: &Organization,
        user: NewOrganizationUser,
        actor: &Actor,
    ) -> Result<OrganizationUser, TenantError> {
        let scope = scope_for(org)?;
        let created = self.directory.create_organization_user(&scope, user).await?;
        self.audit
            .record(
                actor
                    .entry("create", "organization_user", AuditOutcome::Success)
                    .resource_id(created.id)
                    .details(json!({ "organization_id": org.id, "email": created.email })),
            )
            .await;
        Ok(created)
    }

    pub async fn delete_user(&self, org: &Organization, id: Uuid, actor: &Actor) -> Result<bool, TenantError> {
        let scope = scope_for(org)?;
        let removed = self.directory.delete_organization_user(&scope, id).await?;
        if removed {
            self.audit
                .record(
                    actor
                        .entry("delete", "organization_user", AuditOutcome::Success)
                        .resource_id(id)
                        .details(json!({ "organization_id": org.id })),
                )
                .await;
        }
        Ok(removed)
    }
}
