use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::models::{
    AuditFilter, AuditLog, CountBucket, NewAuditLog, NewOrganization, NewOrganizationUser,
    NewPasswordResetToken, NewRole, NewSession, NewUser, Organization, OrganizationUpdate,
    OrganizationUser, PasswordResetToken, Permission, PermissionKey, Role, RoleGrant,
    RoleWithPermissions, Session, SessionRotation, TenantRole, TimeRange, User, UserOrganization,
};
use crate::database::query_builder::TenantScope;
use crate::database::repository::{
    AuditDimension, AuditRepository, OrganizationRepository, OrganizationUserRepository,
    PasswordResetRepository, RoleRepository, SessionRepository, StoreHealth, UserRepository,
};

type NamespaceKey = (String, String);

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, Session>,
    roles: HashMap<Uuid, Role>,
    permissions: Vec<Permission>,
    role_permissions: HashSet<(Uuid, Uuid)>,
    user_roles: HashSet<(Uuid, Uuid)>,
    organizations: HashMap<Uuid, Organization>,
    memberships: HashMap<(Uuid, Uuid), UserOrganization>,
    audit_logs: Vec<AuditLog>,
    reset_tokens: HashMap<Uuid, PasswordResetToken>,
    tenant_users: HashMap<NamespaceKey, Vec<OrganizationUser>>,
}

impl MemoryState {
    fn permission_id(&mut self, key: &PermissionKey) -> Uuid {
        if let Some(existing) = self
            .permissions
            .iter()
            .find(|p| p.resource == key.resource && p.action == key.action)
        {
            return existing.id;
        }
        let id = Uuid::new_v4();
        self.permissions.push(Permission {
            id,
            resource: key.resource.clone(),
            action: key.action.clone(),
        });
        id
    }

    fn permissions_of(&self, role_id: Uuid) -> Vec<PermissionKey> {
        let mut keys: Vec<PermissionKey> = self
            .permissions
            .iter()
            .filter(|p| self.role_permissions.contains(&(role_id, p.id)))
            .map(|p| PermissionKey::new(p.resource.clone(), p.action.clone()))
            .collect();
        keys.sort();
        keys
    }

    fn insert_role(&mut self, role: NewRole) -> Result<Role, DatabaseError> {
        if self.roles.values().any(|r| r.name == role.name) {
            return Err(DatabaseError::Conflict(format!("role '{}' already exists", role.name)));
        }
        let row = Role {
            id: Uuid::new_v4(),
            name: role.name,
            display_name: role.display_name,
            is_system: role.is_system,
            created_at: Utc::now(),
        };
        self.roles.insert(row.id, row.clone());
        Ok(row)
    }
}

/// In-process Credential Store and tenant directory. Selected with
/// `DATABASE_URL=memory://` and used by the test suite.
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store seeded with the same system roles as the Postgres migration.
    pub fn new() -> Self {
        let mut state = MemoryState::default();
        let seeded = state
            .insert_role(NewRole {
                name: "admin".to_string(),
                display_name: "Administrator".to_string(),
                is_system: true,
            })
            .and_then(|_| {
                state.insert_role(NewRole {
                    name: "member".to_string(),
                    display_name: "Member".to_string(),
                    is_system: true,
                })
            });
        if let Ok(member) = seeded {
            let permission = state.permission_id(&PermissionKey::new("integration", "read"));
            state.role_permissions.insert((member.id, permission));
        }

        Self {
            state: RwLock::new(state),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every call fails with `Unavailable` until restored.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), DatabaseError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DatabaseError::Unavailable("memory store offline".to_string()))
        }
    }

    fn namespace_key(scope: &TenantScope) -> NamespaceKey {
        (scope.address.clone(), scope.namespace.name().to_string())
    }

    fn missing_namespace(scope: &TenantScope) -> DatabaseError {
        DatabaseError::QueryError(format!("relation {}.users does not exist", scope.namespace))
    }
}

#[async_trait]
impl StoreHealth for MemoryStore {
    async fn ping(&self) -> Result<(), DatabaseError> {
        self.check()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User, DatabaseError> {
        self.check()?;
        let mut state = self.state.write().await;
        let email = User::normalize_email(&user.email);
        if state.users.values().any(|u| u.email == email) {
            return Err(DatabaseError::Conflict(format!("email '{}' already registered", email)));
        }
        let now = Utc::now();
        let row = User {
            id: Uuid::new_v4(),
            email,
            name: user.name,
            password_hash: user.password_hash,
            is_active: true,
            sso_provider: user.sso_provider,
            sso_subject: user.sso_subject,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        self.check()?;
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        self.check()?;
        let email = User::normalize_email(email);
        Ok(self.state.read().await.users.values().find(|u| u.email == email).cloned())
    }

    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.check()?;
        if let Some(user) = self.state.write().await.users.get_mut(&id) {
            user.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, DatabaseError> {
        self.check()?;
        match self.state.write().await.users.get_mut(&id) {
            Some(user) => {
                user.password_hash = Some(password_hash.to_string());
                user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_user_active(&self, id: Uuid, active: bool) -> Result<bool, DatabaseError> {
        self.check()?;
        match self.state.write().await.users.get_mut(&id) {
            Some(user) => {
                user.is_active = active;
                user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.check()?;
        let mut state = self.state.write().await;
        if state.users.remove(&id).is_none() {
            return Ok(false);
        }
        state.sessions.retain(|_, s| s.user_id != id);
        state.user_roles.retain(|(user_id, _)| *user_id != id);
        state.memberships.retain(|(user_id, _), _| *user_id != id);
        state.reset_tokens.retain(|_, t| t.user_id != id);
        Ok(true)
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn create_session(&self, session: NewSession) -> Result<Session, DatabaseError> {
        self.check()?;
        let now = Utc::now();
        let row = Session {
            id: session.id,
            user_id: session.user_id,
            access_token_hash: session.access_token_hash,
            refresh_token_hash: session.refresh_token_hash,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            expires_at: session.expires_at,
            created_at: now,
            updated_at: now,
        };
        let mut state = self.state.write().await;
        if state.sessions.contains_key(&row.id) {
            return Err(DatabaseError::Conflict(format!("session {} exists", row.id)));
        }
        state.sessions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>, DatabaseError> {
        self.check()?;
        Ok(self.state.read().await.sessions.get(&id).cloned())
    }

    async fn find_session_by_access_hash(&self, hash: &str) -> Result<Option<Session>, DatabaseError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.sessions.values().find(|s| s.access_token_hash == hash).cloned())
    }

    async fn find_session_by_refresh_hash(&self, hash: &str) -> Result<Option<Session>, DatabaseError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.sessions.values().find(|s| s.refresh_token_hash == hash).cloned())
    }

    async fn rotate_session(
        &self,
        refresh_hash: &str,
        rotation: SessionRotation,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, DatabaseError> {
        self.check()?;
        // Lookup and write happen under one write lock.
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .values_mut()
            .find(|s| s.refresh_token_hash == refresh_hash && !s.is_expired(now));
        Ok(session.map(|s| {
            s.access_token_hash = rotation.access_token_hash;
            s.refresh_token_hash = rotation.refresh_token_hash;
            s.expires_at = rotation.expires_at;
            s.updated_at = now;
            s.clone()
        }))
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.check()?;
        Ok(self.state.write().await.sessions.remove(&id).is_some())
    }

    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64, DatabaseError> {
        self.check()?;
        let mut state = self.state.write().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - state.sessions.len()) as u64)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        self.check()?;
        let mut state = self.state.write().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - state.sessions.len()) as u64)
    }
}

#[async_trait]
impl RoleRepository for MemoryStore {
    async fn list_roles(&self) -> Result<Vec<RoleWithPermissions>, DatabaseError> {
        self.check()?;
        let state = self.state.read().await;
        let mut roles: Vec<RoleWithPermissions> = state
            .roles
            .values()
            .map(|role| RoleWithPermissions {
                role: role.clone(),
                permissions: state.permissions_of(role.id),
            })
            .collect();
        roles.sort_by(|a, b| a.role.name.cmp(&b.role.name));
        Ok(roles)
    }

    async fn find_role(&self, id: Uuid) -> Result<Option<Role>, DatabaseError> {
        self.check()?;
        Ok(self.state.read().await.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, DatabaseError> {
        self.check()?;
        Ok(self.state.read().await.roles.values().find(|r| r.name == name).cloned())
    }

    async fn create_role(&self, role: NewRole) -> Result<Role, DatabaseError> {
        self.check()?;
        self.state.write().await.insert_role(role)
    }

    async fn delete_role(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.check()?;
        let mut state = self.state.write().await;
        match state.roles.get(&id) {
            Some(role) if !role.is_system => {
                state.roles.remove(&id);
                state.role_permissions.retain(|(role_id, _)| *role_id != id);
                state.user_roles.retain(|(_, role_id)| *role_id != id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn replace_role_permissions(
        &self,
        role_id: Uuid,
        permissions: &[PermissionKey],
    ) -> Result<(), DatabaseError> {
        self.check()?;
        // Readers never see the intermediate empty set: the write lock is held throughout.
        let mut state = self.state.write().await;
        if !state.roles.contains_key(&role_id) {
            return Err(DatabaseError::NotFound(format!("role {}", role_id)));
        }
        state.role_permissions.retain(|(id, _)| *id != role_id);
        for key in permissions {
            let permission_id = state.permission_id(key);
            state.role_permissions.insert((role_id, permission_id));
        }
        Ok(())
    }

    async fn grant_permission(&self, role_id: Uuid, permission: &PermissionKey) -> Result<(), DatabaseError> {
        self.check()?;
        let mut state = self.state.write().await;
        if !state.roles.contains_key(&role_id) {
            return Err(DatabaseError::NotFound(format!("role {}", role_id)));
        }
        let permission_id = state.permission_id(permission);
        state.role_permissions.insert((role_id, permission_id));
        Ok(())
    }

    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool, DatabaseError> {
        self.check()?;
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user_id) || !state.roles.contains_key(&role_id) {
            return Err(DatabaseError::NotFound("user or role".to_string()));
        }
        Ok(state.user_roles.insert((user_id, role_id)))
    }

    async fn revoke_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool, DatabaseError> {
        self.check()?;
        Ok(self.state.write().await.user_roles.remove(&(user_id, role_id)))
    }

    async fn role_grants_for_user(&self, user_id: Uuid) -> Result<Vec<RoleGrant>, DatabaseError> {
        self.check()?;
        let state = self.state.read().await;
        let mut grants = Vec::new();
        for (_, role_id) in state.user_roles.iter().filter(|(u, _)| *u == user_id) {
            let Some(role) = state.roles.get(role_id) else {
                continue;
            };
            let permissions = state.permissions_of(role.id);
            if permissions.is_empty() {
                grants.push(RoleGrant {
                    role_name: role.name.clone(),
                    permission: None,
                });
            }
            for permission in permissions {
                grants.push(RoleGrant {
                    role_name: role.name.clone(),
                    permission: Some(permission),
                });
            }
        }
        Ok(grants)
    }
}

#[async_trait]
impl OrganizationRepository for MemoryStore {
    async fn create_organization(&self, org: NewOrganization) -> Result<Organization, DatabaseError> {
        self.check()?;
        let mut state = self.state.write().await;
        let id = org.id.unwrap_or_else(Uuid::new_v4);
        if state.organizations.contains_key(&id) {
            return Err(DatabaseError::Conflict(format!("organization {} exists", id)));
        }
        let now = Utc::now();
        let row = Organization {
            id,
            name: org.name,
            sso_active: org.sso_active,
            write_address: org.write_address,
            read_address: org.read_address,
            created_at: now,
            updated_at: now,
        };
        state.organizations.insert(id, row.clone());
        Ok(row)
    }

    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, DatabaseError> {
        self.check()?;
        Ok(self.state.read().await.organizations.get(&id).cloned())
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>, DatabaseError> {
        self.check()?;
        let mut rows: Vec<Organization> = self.state.read().await.organizations.values().cloned().collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn update_organization(
        &self,
        id: Uuid,
        update: OrganizationUpdate,
    ) -> Result<Option<Organization>, DatabaseError> {
        self.check()?;
        let mut state = self.state.write().await;
        let Some(org) = state.organizations.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = update.name {
            org.name = name;
        }
        if let Some(sso_active) = update.sso_active {
            org.sso_active = sso_active;
        }
        if let Some(write_address) = update.write_address {
            org.write_address = write_address;
        }
        if let Some(read_address) = update.read_address {
            org.read_address = read_address;
        }
        org.updated_at = Utc::now();
        Ok(Some(org.clone()))
    }

    async fn delete_organization(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.check()?;
        let mut state = self.state.write().await;
        if state.memberships.keys().any(|(_, org)| *org == id) {
            return Ok(false);
        }
        Ok(state.organizations.remove(&id).is_some())
    }

    async fn count_members(&self, organization_id: Uuid) -> Result<i64, DatabaseError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.memberships.keys().filter(|(_, org)| *org == organization_id).count() as i64)
    }

    async fn find_membership(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<UserOrganization>, DatabaseError> {
        self.check()?;
        Ok(self.state.read().await.memberships.get(&(user_id, organization_id)).cloned())
    }

    async fn list_memberships_for_user(&self, user_id: Uuid) -> Result<Vec<UserOrganization>, DatabaseError> {
        self.check()?;
        let state = self.state.read().await;
        let mut rows: Vec<UserOrganization> = state
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    async fn upsert_membership(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        role: TenantRole,
    ) -> Result<UserOrganization, DatabaseError> {
        self.check()?;
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user_id) {
            return Err(DatabaseError::NotFound(format!("user {}", user_id)));
        }
        let edge = state
            .memberships
            .entry((user_id, organization_id))
            .or_insert_with(|| UserOrganization {
                user_id,
                organization_id,
                role: role.as_str().to_string(),
                created_at: Utc::now(),
            });
        edge.role = role.as_str().to_string();
        Ok(edge.clone())
    }

    async fn remove_membership(&self, user_id: Uuid, organization_id: Uuid) -> Result<bool, DatabaseError> {
        self.check()?;
        Ok(self.state.write().await.memberships.remove(&(user_id, organization_id)).is_some())
    }
}

fn count_by(entries: &[&AuditLog], dimension: AuditDimension, limit: Option<i64>) -> Vec<CountBucket> {
    let mut counts: HashMap<String, i64> = HashMap::new();
    for entry in entries {
        if let Some(key) = dimension.key_of(entry) {
            *counts.entry(key).or_default() += 1;
        }
    }
    let mut buckets: Vec<CountBucket> = counts.into_iter().map(|(key, count)| CountBucket { key, count }).collect();
    buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    if let Some(limit) = limit {
        buckets.truncate(limit.max(0) as usize);
    }
    buckets
}

fn newest_first(entries: &mut [&AuditLog]) {
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn insert_audit_log(&self, entry: NewAuditLog) -> Result<(), DatabaseError> {
        self.check()?;
        let row = AuditLog {
            id: Uuid::new_v4(),
            user_id: entry.user_id,
            user_email: entry.user_email,
            action: entry.action,
            resource: entry.resource,
            resource_id: entry.resource_id,
            details: entry.details,
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            status: entry.outcome.as_str().to_string(),
            created_at: entry.created_at,
        };
        self.state.write().await.audit_logs.push(row);
        Ok(())
    }

    async fn query_audit_logs(&self, filter: &AuditFilter) -> Result<(Vec<AuditLog>, i64), DatabaseError> {
        self.check()?;
        let state = self.state.read().await;
        let mut matching: Vec<&AuditLog> = state.audit_logs.iter().filter(|e| filter.matches(e)).collect();
        newest_first(&mut matching);
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.offset().max(0) as usize)
            .take(filter.size.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn count_audit_logs(&self, range: TimeRange) -> Result<i64, DatabaseError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.audit_logs.iter().filter(|e| range.contains(e.created_at)).count() as i64)
    }

    async fn audit_counts_by(
        &self,
        dimension: AuditDimension,
        range: TimeRange,
        limit: Option<i64>,
    ) -> Result<Vec<CountBucket>, DatabaseError> {
        self.check()?;
        let state = self.state.read().await;
        let entries: Vec<&AuditLog> = state.audit_logs.iter().filter(|e| range.contains(e.created_at)).collect();
        Ok(count_by(&entries, dimension, limit))
    }

    async fn recent_audit_logs(&self, range: TimeRange, limit: i64) -> Result<Vec<AuditLog>, DatabaseError> {
        self.check()?;
        let state = self.state.read().await;
        let mut entries: Vec<&AuditLog> = state.audit_logs.iter().filter(|e| range.contains(e.created_at)).collect();
        newest_first(&mut entries);
        Ok(entries.into_iter().take(limit.max(0) as usize).cloned().collect())
    }

    async fn prune_audit_logs(&self, older_than: DateTime<Utc>) -> Result<u64, DatabaseError> {
        self.check()?;
        let mut state = self.state.write().await;
        let before = state.audit_logs.len();
        state.audit_logs.retain(|e| e.created_at >= older_than);
        Ok((before - state.audit_logs.len()) as u64)
    }
}

#[async_trait]
impl PasswordResetRepository for MemoryStore {
    async fn create_reset_token(&self, token: NewPasswordResetToken) -> Result<PasswordResetToken, DatabaseError> {
        self.check()?;
        let row = PasswordResetToken {
            id: Uuid::new_v4(),
            user_id: token.user_id,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
            used_at: None,
            created_at: Utc::now(),
        };
        self.state.write().await.reset_tokens.insert(row.id, row.clone());
        Ok(row)
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordResetToken>, DatabaseError> {
        self.check()?;
        let mut state = self.state.write().await;
        let token = state
            .reset_tokens
            .values_mut()
            .find(|t| t.token_hash == token_hash && t.used_at.is_none() && t.expires_at > now);
        Ok(token.map(|t| {
            t.used_at = Some(now);
            t.clone()
        }))
    }

    async fn delete_expired_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        self.check()?;
        let mut state = self.state.write().await;
        let before = state.reset_tokens.len();
        state.reset_tokens.retain(|_, t| t.expires_at > now && t.used_at.is_none());
        Ok((before - state.reset_tokens.len()) as u64)
    }
}

#[async_trait]
impl OrganizationUserRepository for MemoryStore {
    async fn provision_namespace(&self, scope: &TenantScope) -> Result<(), DatabaseError> {
        self.check()?;
        self.state
            .write()
            .await
            .tenant_users
            .entry(Self::namespace_key(scope))
            .or_default();
        Ok(())
    }

    async fn list_organization_users(
        &self,
        scope: &TenantScope,
        page: i64,
        size: i64,
    ) -> Result<(Vec<OrganizationUser>, i64), DatabaseError> {
        self.check()?;
        let state = self.state.read().await;
        let users = state
            .tenant_users
            .get(&Self::namespace_key(scope))
            .ok_or_else(|| Self::missing_namespace(scope))?;
        let offset = (page.max(1) - 1).saturating_mul(size).max(0) as usize;
        let rows = users.iter().skip(offset).take(size.max(0) as usize).cloned().collect();
        Ok((rows, users.len() as i64))
    }

    async fn find_organization_user(
        &self,
        scope: &TenantScope,
        id: Uuid,
    ) -> Result<Option<OrganizationUser>, DatabaseError> {
        self.check()?;
        let state = self.state.read().await;
        let users = state
            .tenant_users
            .get(&Self::namespace_key(scope))
            .ok_or_else(|| Self::missing_namespace(scope))?;
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn create_organization_user(
        &self,
        scope: &TenantScope,
        user: NewOrganizationUser,
    ) -> Result<OrganizationUser, DatabaseError> {
        self.check()?;
        let mut state = self.state.write().await;
        let users = state
            .tenant_users
            .get_mut(&Self::namespace_key(scope))
            .ok_or_else(|| Self::missing_namespace(scope))?;
        let email = User::normalize_email(&user.email);
        if users.iter().any(|u| u.email == email) {
            return Err(DatabaseError::Conflict(format!("email '{}' already exists", email)));
        }
        let now = Utc::now();
        let row = OrganizationUser {
            id: Uuid::new_v4(),
            email,
            name: user.name,
            password_hash: None,
            is_active: true,
            sso_subject: user.sso_subject,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        users.push(row.clone());
        Ok(row)
    }

    async fn delete_organization_user(&self, scope: &TenantScope, id: Uuid) -> Result<bool, DatabaseError> {
        self.check()?;
        let mut state = self.state.write().await;
        let users = state
            .tenant_users
            .get_mut(&Self::namespace_key(scope))
            .ok_or_else(|| Self::missing_namespace(scope))?;
        let before = users.len();
        users.retain(|u| u.id != id);
        Ok(users.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::query_builder::TenantNamespace;
    use chrono::Duration;

    fn new_session(user_id: Uuid, tag: &str, expires_at: DateTime<Utc>) -> NewSession {
        NewSession {
            id: Uuid::new_v4(),
            user_id,
            access_token_hash: format!("access-{}", tag),
            refresh_token_hash: format!("refresh-{}", tag),
            ip_address: None,
            user_agent: None,
            expires_at,
        }
    }

    #[tokio::test]
    async fn seeds_system_roles() {
        let store = MemoryStore::new();
        let roles = store.list_roles().await.unwrap();
        let names: Vec<&str> = roles.iter().map(|r| r.role.name.as_str()).collect();
        assert_eq!(names, vec!["admin", "member"]);
        assert!(roles.iter().all(|r| r.role.is_system));
        assert_eq!(roles[1].permissions, vec![PermissionKey::new("integration", "read")]);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let store = MemoryStore::new();
        let user = NewUser {
            email: "A@x.com".to_string(),
            name: "A".to_string(),
            password_hash: None,
            sso_provider: None,
            sso_subject: None,
        };
        store.create_user(user.clone()).await.unwrap();
        let again = NewUser {
            email: "a@X.com ".to_string(),
            ..user
        };
        assert!(matches!(store.create_user(again).await, Err(DatabaseError::Conflict(_))));
    }

    #[tokio::test]
    async fn rotation_is_single_use() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let user_id = Uuid::new_v4();
        store
            .create_session(new_session(user_id, "one", now + Duration::hours(1)))
            .await
            .unwrap();

        let rotation = SessionRotation {
            access_token_hash: "access-two".to_string(),
            refresh_token_hash: "refresh-two".to_string(),
            expires_at: now + Duration::hours(2),
        };
        assert!(store.rotate_session("refresh-one", rotation.clone(), now).await.unwrap().is_some());
        assert!(store.rotate_session("refresh-one", rotation, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_sweep_keeps_live_sessions() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let user_id = Uuid::new_v4();
        for tag in ["e1", "e2", "e3"] {
            store
                .create_session(new_session(user_id, tag, now - Duration::minutes(1)))
                .await
                .unwrap();
        }
        for tag in ["l1", "l2"] {
            store
                .create_session(new_session(user_id, tag, now + Duration::hours(1)))
                .await
                .unwrap();
        }
        assert_eq!(store.delete_expired_sessions(now).await.unwrap(), 3);
        assert!(store.find_session_by_access_hash("access-l1").await.unwrap().is_some());
        assert!(store.find_session_by_refresh_hash("refresh-l2").await.unwrap().is_some());
        assert!(store.find_session_by_access_hash("access-e1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replacing_permissions_drops_old_grants() {
        let store = MemoryStore::new();
        let role = store
            .create_role(NewRole {
                name: "ops".to_string(),
                display_name: "Ops".to_string(),
                is_system: false,
            })
            .await
            .unwrap();
        store
            .replace_role_permissions(role.id, &[PermissionKey::new("audit", "read")])
            .await
            .unwrap();
        store
            .replace_role_permissions(role.id, &[PermissionKey::new("integration", "write")])
            .await
            .unwrap();
        let roles = store.list_roles().await.unwrap();
        let ops = roles.iter().find(|r| r.role.name == "ops").unwrap();
        assert_eq!(ops.permissions, vec![PermissionKey::new("integration", "write")]);
    }

    #[tokio::test]
    async fn system_roles_are_not_deleted() {
        let store = MemoryStore::new();
        let admin = store.find_role_by_name("admin").await.unwrap().unwrap();
        assert!(!store.delete_role(admin.id).await.unwrap());
        assert!(store.find_role(admin.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn tenant_directories_are_isolated_per_namespace() {
        let store = MemoryStore::new();
        let address = "postgres://shared/tenants".to_string();
        let scope = |id| TenantScope {
            organization_id: id,
            namespace: TenantNamespace::for_organization(id),
            address: address.clone(),
        };
        let (a, b) = (scope(Uuid::new_v4()), scope(Uuid::new_v4()));
        store.provision_namespace(&a).await.unwrap();
        store.provision_namespace(&b).await.unwrap();

        store
            .create_organization_user(
                &a,
                NewOrganizationUser {
                    email: "x@a.com".to_string(),
                    name: "X".to_string(),
                    sso_subject: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(store.list_organization_users(&a, 1, 10).await.unwrap().1, 1);
        assert_eq!(store.list_organization_users(&b, 1, 10).await.unwrap().1, 0);
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(store.ping().await, Err(DatabaseError::Unavailable(_))));
        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
