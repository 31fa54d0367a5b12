use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::models::{
    AuditFilter, AuditLog, CountBucket, NewAuditLog, NewOrganization, NewOrganizationUser,
    NewPasswordResetToken, NewRole, NewSession, NewUser, Organization, OrganizationUpdate,
    OrganizationUser, PasswordResetToken, PermissionKey, Role, RoleGrant, RoleWithPermissions,
    Session, SessionRotation, TenantRole, TimeRange, User, UserOrganization,
};
use crate::database::query_builder::TenantScope;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `Conflict` when the email is taken.
    async fn create_user(&self, user: NewUser) -> Result<User, DatabaseError>;
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError>;
    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DatabaseError>;
    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, DatabaseError>;
    async fn set_user_active(&self, id: Uuid, active: bool) -> Result<bool, DatabaseError>;
    /// Remove the user along with its sessions, role links and memberships.
    async fn delete_user(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(&self, session: NewSession) -> Result<Session, DatabaseError>;
    async fn find_session(&self, id: Uuid) -> Result<Option<Session>, DatabaseError>;
    async fn find_session_by_access_hash(&self, hash: &str) -> Result<Option<Session>, DatabaseError>;
    async fn find_session_by_refresh_hash(&self, hash: &str) -> Result<Option<Session>, DatabaseError>;
    /// Swap the token hashes of the live session holding `refresh_hash`. The
    /// lookup and the write are one atomic step: of two concurrent callers
    /// presenting the same refresh token, at most one gets `Some`.
    async fn rotate_session(
        &self,
        refresh_hash: &str,
        rotation: SessionRotation,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, DatabaseError>;
    async fn delete_session(&self, id: Uuid) -> Result<bool, DatabaseError>;
    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64, DatabaseError>;
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn list_roles(&self) -> Result<Vec<RoleWithPermissions>, DatabaseError>;
    async fn find_role(&self, id: Uuid) -> Result<Option<Role>, DatabaseError>;
    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, DatabaseError>;
    async fn create_role(&self, role: NewRole) -> Result<Role, DatabaseError>;
    async fn delete_role(&self, id: Uuid) -> Result<bool, DatabaseError>;
    /// Replace the permission set of a role inside one transaction.
    async fn replace_role_permissions(
        &self,
        role_id: Uuid,
        permissions: &[PermissionKey],
    ) -> Result<(), DatabaseError>;
    /// Add one permission to a role; existing grants are kept.
    async fn grant_permission(&self, role_id: Uuid, permission: &PermissionKey) -> Result<(), DatabaseError>;
    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool, DatabaseError>;
    async fn revoke_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool, DatabaseError>;
    /// User -> role -> permission join rows for one user.
    async fn role_grants_for_user(&self, user_id: Uuid) -> Result<Vec<RoleGrant>, DatabaseError>;
}

#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    async fn create_organization(&self, org: NewOrganization) -> Result<Organization, DatabaseError>;
    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, DatabaseError>;
    async fn list_organizations(&self) -> Result<Vec<Organization>, DatabaseError>;
    async fn update_organization(
        &self,
        id: Uuid,
        update: OrganizationUpdate,
    ) -> Result<Option<Organization>, DatabaseError>;
    /// Deletes only when no membership edge references the organization.
    async fn delete_organization(&self, id: Uuid) -> Result<bool, DatabaseError>;
    async fn count_members(&self, organization_id: Uuid) -> Result<i64, DatabaseError>;
    async fn find_membership(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<UserOrganization>, DatabaseError>;
    async fn list_memberships_for_user(&self, user_id: Uuid) -> Result<Vec<UserOrganization>, DatabaseError>;
    async fn upsert_membership(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        role: TenantRole,
    ) -> Result<UserOrganization, DatabaseError>;
    async fn remove_membership(&self, user_id: Uuid, organization_id: Uuid) -> Result<bool, DatabaseError>;
}

/// Column an aggregate audit count is grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditDimension {
    Action,
    Resource,
    Status,
    Actor,
}

impl AuditDimension {
    pub fn key_of(&self, entry: &AuditLog) -> Option<String> {
        match self {
            AuditDimension::Action => Some(entry.action.clone()),
            AuditDimension::Resource => Some(entry.resource.clone()),
            AuditDimension::Status => Some(entry.status.clone()),
            AuditDimension::Actor => entry.user_email.clone(),
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            AuditDimension::Action => "action",
            AuditDimension::Resource => "resource",
            AuditDimension::Status => "status",
            AuditDimension::Actor => "user_email",
        }
    }
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn insert_audit_log(&self, entry: NewAuditLog) -> Result<(), DatabaseError>;
    /// Newest first, with the total count of matching rows.
    async fn query_audit_logs(&self, filter: &AuditFilter) -> Result<(Vec<AuditLog>, i64), DatabaseError>;
    async fn count_audit_logs(&self, range: TimeRange) -> Result<i64, DatabaseError>;
    /// Counts grouped by `dimension`, largest first. Rows without a key are skipped.
    async fn audit_counts_by(
        &self,
        dimension: AuditDimension,
        range: TimeRange,
        limit: Option<i64>,
    ) -> Result<Vec<CountBucket>, DatabaseError>;
    async fn recent_audit_logs(&self, range: TimeRange, limit: i64) -> Result<Vec<AuditLog>, DatabaseError>;
    async fn prune_audit_logs(&self, older_than: DateTime<Utc>) -> Result<u64, DatabaseError>;
}

#[async_trait]
pub trait PasswordResetRepository: Send + Sync {
    async fn create_reset_token(&self, token: NewPasswordResetToken) -> Result<PasswordResetToken, DatabaseError>;
    /// Mark an unused, unexpired token as used and return it. Single use.
    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordResetToken>, DatabaseError>;
    async fn delete_expired_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError>;
}

/// Tenant-local user directory. Every call is bound to one tenant scope.
#[async_trait]
pub trait OrganizationUserRepository: Send + Sync {
    async fn provision_namespace(&self, scope: &TenantScope) -> Result<(), DatabaseError>;
    async fn list_organization_users(
        &self,
        scope: &TenantScope,
        page: i64,
        size: i64,
    ) -> Result<(Vec<OrganizationUser>, i64), DatabaseError>;
    async fn find_organization_user(
        &self,
        scope: &TenantScope,
        id: Uuid,
    ) -> Result<Option<OrganizationUser>, DatabaseError>;
    async fn create_organization_user(
        &self,
        scope: &TenantScope,
        user: NewOrganizationUser,
    ) -> Result<OrganizationUser, DatabaseError>;
    async fn delete_organization_user(&self, scope: &TenantScope, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> Result<(), DatabaseError>;
}

/// Everything the central Credential Store provides.
pub trait CredentialStore:
    UserRepository
    + SessionRepository
    + RoleRepository
    + OrganizationRepository
    + AuditRepository
    + PasswordResetRepository
    + StoreHealth
{
}

impl<T> CredentialStore for T where
    T: UserRepository
        + SessionRepository
        + RoleRepository
        + OrganizationRepository
        + AuditRepository
        + PasswordResetRepository
        + StoreHealth
{
}
