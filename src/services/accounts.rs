use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth;
use crate::config::SecurityConfig;
use crate::database::models::{AuditOutcome, NewAuditLog, NewPasswordResetToken, NewUser, User};
use crate::database::{DatabaseError, PasswordResetRepository, RoleRepository, UserRepository};
use crate::services::audit::AuditRecorder;
use crate::services::session::{SessionError, SessionManager};
use crate::services::{Actor, RequestOrigin};

/// Role every self-registered account receives.
pub const DEFAULT_ROLE: &str = "member";

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Registration is disabled")]
    RegistrationDisabled,

    #[error("{0}")]
    InvalidInput(String),

    #[error("Email already registered")]
    EmailTaken,

    #[error("Current password is incorrect")]
    WrongPassword,

    #[error("Reset token is invalid or expired")]
    InvalidResetToken,

    #[error("User not found")]
    UserNotFound,

    #[error("Credential error: {0}")]
    Credential(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(DatabaseError),
}

impl From<DatabaseError> for AccountError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict(_) => AccountError::EmailTaken,
            other => AccountError::Store(other),
        }
    }
}

impl From<auth::PasswordError> for AccountError {
    fn from(err: auth::PasswordError) -> Self {
        AccountError::Credential(err.to_string())
    }
}

/// Account lifecycle: registration, password changes, deactivation, resets.
pub struct AccountService {
    users: Arc<dyn UserRepository>,
    roles: Arc<dyn RoleRepository>,
    resets: Arc<dyn PasswordResetRepository>,
    sessions: Arc<SessionManager>,
    audit: Arc<AuditRecorder>,
    min_password_length: usize,
    allow_registration: bool,
    reset_ttl: Duration,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        roles: Arc<dyn RoleRepository>,
        resets: Arc<dyn PasswordResetRepository>,
        sessions: Arc<SessionManager>,
        audit: Arc<AuditRecorder>,
        security: &SecurityConfig,
    ) -> Self {
        Self {
            users,
            roles,
            resets,
            sessions,
            audit,
            min_password_length: security.min_password_length,
            allow_registration: security.allow_registration,
            reset_ttl: Duration::minutes(security.password_reset_ttl_mins),
        }
    }

    /// Self-service sign-up, subject to the registration toggle.
    pub async fn register(
        &self,
        email: &str,
        name: &str,
        password: &str,
        origin: &RequestOrigin,
    ) -> Result<User, AccountError> {
        if !self.allow_registration {
            return Err(AccountError::RegistrationDisabled);
        }
        let user = self.create_account(email, name, password).await?;
        self.audit
            .record(
                NewAuditLog::new("register", "user", AuditOutcome::Success)
                    .actor(Some(user.id), Some(&user.email))
                    .resource_id(user.id)
                    .origin(origin.ip_address.clone(), origin.user_agent.clone()),
            )
            .await;
        Ok(user)
    }

    /// Operator-created account; ignores the registration toggle.
    pub async fn create_user(&self, email: &str, name: &str, password: &str, actor: &Actor) -> Result<User, AccountError> {
        let user = self.create_account(email, name, password).await?;
        self.audit
            .record(
                actor
                    .entry("create", "user", AuditOutcome::Success)
                    .resource_id(user.id)
                    .details(json!({ "email": user.email })),
            )
            .await;
        Ok(user)
    }

    async fn create_account(&self, email: &str, name: &str, password: &str) -> Result<User, AccountError> {
        let email = User::normalize_email(email);
        validate_email(&email)?;
        if name.trim().is_empty() {
            return Err(AccountError::InvalidInput("Name is required".to_string()));
        }
        self.validate_password(password)?;

        let password_hash = auth::hash_password_blocking(password).await?;
        let user = self
            .users
            .create_user(NewUser {
                email,
                name: name.trim().to_string(),
                password_hash: Some(password_hash),
                sso_provider: None,
                sso_subject: None,
            })
            .await?;

        if let Err(e) = self.assign_default_role(user.id).await {
            warn!(user_id = %user.id, "Default role assignment failed, removing account: {}", e);
            if let Err(cleanup) = self.users.delete_user(user.id).await {
                error!(user_id = %user.id, "Failed to remove half-created account: {}", cleanup);
            }
            return Err(e.into());
        }

        info!(user_id = %user.id, "Created account");
        Ok(user)
    }

    async fn assign_default_role(&self, user_id: Uuid) -> Result<(), DatabaseError> {
        match self.roles.find_role_by_name(DEFAULT_ROLE).await? {
            Some(role) => {
                self.roles.assign_role(user_id, role.id).await?;
            }
            None => warn!("Default role '{}' missing; new account has no roles", DEFAULT_ROLE),
        }
        Ok(())
    }

    /// Change a password after re-checking the current one. Ends every session.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
        origin: &RequestOrigin,
    ) -> Result<(), AccountError> {
        let user = self.users.find_user_by_id(user_id).await?.ok_or(AccountError::UserNotFound)?;
        if !auth::verify_password_blocking(current_password, user.password_hash.as_deref()).await {
            self.audit
                .record(
                    NewAuditLog::new("change_password", "user", AuditOutcome::Failure)
                        .actor(Some(user.id), Some(&user.email))
                        .resource_id(user.id)
                        .origin(origin.ip_address.clone(), origin.user_agent.clone()),
                )
                .await;
            return Err(AccountError::WrongPassword);
        }
        self.validate_password(new_password)?;

        let hash = auth::hash_password_blocking(new_password).await?;
        self.users.update_password_hash(user.id, &hash).await?;
        self.sessions.revoke_all_sessions(user.id, origin).await?;

        self.audit
            .record(
                NewAuditLog::new("change_password", "user", AuditOutcome::Success)
                    .actor(Some(user.id), Some(&user.email))
                    .resource_id(user.id)
                    .origin(origin.ip_address.clone(), origin.user_agent.clone()),
            )
            .await;
        Ok(())
    }

    /// Soft-delete: the row stays for audit history, every session ends.
    pub async fn deactivate(&self, user_id: Uuid, actor: &Actor) -> Result<(), AccountError> {
        if !self.users.set_user_active(user_id, false).await? {
            return Err(AccountError::UserNotFound);
        }
        self.sessions.revoke_all_sessions(user_id, &actor.origin).await?;
        info!(user_id = %user_id, "Deactivated account");
        self.audit
            .record(actor.entry("deactivate", "user", AuditOutcome::Success).resource_id(user_id))
            .await;
        Ok(())
    }

    /// Issue a single-use reset token. Returns `None` for unknown or inactive
    /// accounts; callers must answer the same way in both cases.
    pub async fn request_password_reset(&self, email: &str, origin: &RequestOrigin) -> Result<Option<String>, AccountError> {
        let email = User::normalize_email(email);
        let Some(user) = self.users.find_user_by_email(&email).await? else {
            return Ok(None);
        };
        if !user.is_active {
            return Ok(None);
        }

        let token = auth::generate_opaque_token();
        self.resets
            .create_reset_token(NewPasswordResetToken {
                user_id: user.id,
                token_hash: auth::hash_token(&token),
                expires_at: Utc::now() + self.reset_ttl,
            })
            .await?;

        self.audit
            .record(
                NewAuditLog::new("request_password_reset", "user", AuditOutcome::Success)
                    .actor(Some(user.id), Some(&user.email))
                    .resource_id(user.id)
                    .origin(origin.ip_address.clone(), origin.user_agent.clone()),
            )
            .await;
        Ok(Some(token))
    }

    /// Consume a reset token and set a new password. Ends every session.
    pub async fn reset_password(&self, token: &str, new_password: &str, origin: &RequestOrigin) -> Result<(), AccountError> {
        // checked first so a weak password does not burn the token
        self.validate_password(new_password)?;

        let Some(reset) = self.resets.consume_reset_token(&auth::hash_token(token), Utc::now()).await? else {
            self.audit
                .record(
                    NewAuditLog::new("reset_password", "user", AuditOutcome::Failure)
                        .origin(origin.ip_address.clone(), origin.user_agent.clone()),
                )
                .await;
            return Err(AccountError::InvalidResetToken);
        };

        let hash = auth::hash_password_blocking(new_password).await?;
        if !self.users.update_password_hash(reset.user_id, &hash).await? {
            return Err(AccountError::UserNotFound);
        }
        self.sessions.revoke_all_sessions(reset.user_id, origin).await?;

        self.audit
            .record(
                NewAuditLog::new("reset_password", "user", AuditOutcome::Success)
                    .actor(Some(reset.user_id), None)
                    .resource_id(reset.user_id)
                    .origin(origin.ip_address.clone(), origin.user_agent.clone()),
            )
            .await;
        Ok(())
    }

    pub async fn delete_expired_reset_tokens(&self) -> Result<u64, AccountError> {
        Ok(self.resets.delete_expired_reset_tokens(Utc::now()).await?)
    }

    fn validate_password(&self, password: &str) -> Result<(), AccountError> {
        if password.chars().count() < self.min_password_length {
            return Err(AccountError::InvalidInput(format!(
                "Password must be at least {} characters",
                self.min_password_length
            )));
        }
        Ok(())
    }
}

fn validate_email(email: &str) -> Result<(), AccountError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if valid && email.len() <= 254 {
        Ok(())
    } else {
        Err(AccountError::InvalidInput("A valid email address is required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::database::models::{NewRole, PermissionKey, Role, RoleGrant, RoleWithPermissions};
    use crate::database::MemoryStore;

    fn service() -> (Arc<MemoryStore>, AccountService, Arc<SessionManager>) {
        service_on(Arc::new(MemoryStore::new()))
    }

    fn service_on(store: Arc<MemoryStore>) -> (Arc<MemoryStore>, AccountService, Arc<SessionManager>) {
        let config = AppConfig::development();
        let audit = Arc::new(AuditRecorder::new(store.clone(), &config.audit));
        let sessions = Arc::new(SessionManager::new(store.clone(), store.clone(), &config.security, audit.clone()));
        let accounts = AccountService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            sessions.clone(),
            audit,
            &config.security,
        );
        (store, accounts, sessions)
    }

    #[tokio::test]
    async fn registration_assigns_default_role() {
        let (store, accounts, _) = service();
        let user = accounts
            .register("New@x.com", "New", "long enough pw", &RequestOrigin::default())
            .await
            .unwrap();
        assert_eq!(user.email, "new@x.com");
        let grants = store.role_grants_for_user(user.id).await.unwrap();
        assert!(grants.iter().any(|g| g.role_name == DEFAULT_ROLE));
    }

    /// Delegates to the memory store but refuses every role assignment.
    struct RejectingAssignments(Arc<MemoryStore>);

    #[async_trait::async_trait]
    impl RoleRepository for RejectingAssignments {
        async fn list_roles(&self) -> Result<Vec<RoleWithPermissions>, DatabaseError> {
            self.0.list_roles().await
        }
        async fn find_role(&self, id: Uuid) -> Result<Option<Role>, DatabaseError> {
            self.0.find_role(id).await
        }
        async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, DatabaseError> {
            self.0.find_role_by_name(name).await
        }
        async fn create_role(&self, role: NewRole) -> Result<Role, DatabaseError> {
            self.0.create_role(role).await
        }
        async fn delete_role(&self, id: Uuid) -> Result<bool, DatabaseError> {
            self.0.delete_role(id).await
        }
        async fn replace_role_permissions(&self, role_id: Uuid, permissions: &[PermissionKey]) -> Result<(), DatabaseError> {
            self.0.replace_role_permissions(role_id, permissions).await
        }
        async fn grant_permission(&self, role_id: Uuid, permission: &PermissionKey) -> Result<(), DatabaseError> {
            self.0.grant_permission(role_id, permission).await
        }
        async fn assign_role(&self, _user_id: Uuid, _role_id: Uuid) -> Result<bool, DatabaseError> {
            Err(DatabaseError::Unavailable("role store offline".to_string()))
        }
        async fn revoke_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool, DatabaseError> {
            self.0.revoke_role(user_id, role_id).await
        }
        async fn role_grants_for_user(&self, user_id: Uuid) -> Result<Vec<RoleGrant>, DatabaseError> {
            self.0.role_grants_for_user(user_id).await
        }
    }

    #[tokio::test]
    async fn failed_role_assignment_leaves_no_account_behind() {
        let config = AppConfig::development();
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(AuditRecorder::new(store.clone(), &config.audit));
        let sessions = Arc::new(SessionManager::new(store.clone(), store.clone(), &config.security, audit.clone()));
        let accounts = AccountService::new(
            store.clone(),
            Arc::new(RejectingAssignments(store.clone())),
            store.clone(),
            sessions,
            audit,
            &config.security,
        );

        let origin = RequestOrigin::default();
        assert!(accounts.register("a@x.com", "A", "long enough pw", &origin).await.is_err());
        assert!(store.find_user_by_email("a@x.com").await.unwrap().is_none());

        // The address is free again once the role store recovers.
        let (_, healthy, _) = service_on(store.clone());
        healthy.register("a@x.com", "A", "long enough pw", &origin).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let (_, accounts, _) = service();
        let origin = RequestOrigin::default();
        accounts.register("a@x.com", "A", "long enough pw", &origin).await.unwrap();
        assert!(matches!(
            accounts.register("A@X.com", "A", "long enough pw", &origin).await,
            Err(AccountError::EmailTaken)
        ));
    }

    #[tokio::test]
    async fn rejects_short_password_and_bad_email() {
        let (_, accounts, _) = service();
        let origin = RequestOrigin::default();
        assert!(matches!(
            accounts.register("a@x.com", "A", "short", &origin).await,
            Err(AccountError::InvalidInput(_))
        ));
        assert!(matches!(
            accounts.register("not-an-email", "A", "long enough pw", &origin).await,
            Err(AccountError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn password_change_revokes_sessions() {
        let (_, accounts, sessions) = service();
        let origin = RequestOrigin::default();
        let user = accounts.register("a@x.com", "A", "old password!", &origin).await.unwrap();
        let pair = sessions.login("a@x.com", "old password!", &origin).await.unwrap();

        assert!(matches!(
            accounts.change_password(user.id, "wrong", "new password!", &origin).await,
            Err(AccountError::WrongPassword)
        ));
        accounts
            .change_password(user.id, "old password!", "new password!", &origin)
            .await
            .unwrap();

        assert!(sessions.validate_token(&pair.token).await.is_err());
        assert!(sessions.login("a@x.com", "new password!", &origin).await.is_ok());
    }

    #[tokio::test]
    async fn reset_token_is_single_use() {
        let (_, accounts, sessions) = service();
        let origin = RequestOrigin::default();
        accounts.register("a@x.com", "A", "old password!", &origin).await.unwrap();

        let token = accounts.request_password_reset("a@x.com", &origin).await.unwrap().unwrap();
        accounts.reset_password(&token, "brand new pw", &origin).await.unwrap();
        assert!(matches!(
            accounts.reset_password(&token, "another new pw", &origin).await,
            Err(AccountError::InvalidResetToken)
        ));
        assert!(sessions.login("a@x.com", "brand new pw", &origin).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_email_reset_is_silent() {
        let (_, accounts, _) = service();
        assert!(accounts
            .request_password_reset("ghost@x.com", &RequestOrigin::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn deactivation_blocks_login() {
        let (_, accounts, sessions) = service();
        let origin = RequestOrigin::default();
        let user = accounts.register("a@x.com", "A", "long enough pw", &origin).await.unwrap();
        accounts.deactivate(user.id, &Actor::system()).await.unwrap();
        assert!(matches!(
            sessions.login("a@x.com", "long enough pw", &origin).await,
            Err(SessionError::AccountDisabled)
        ));
    }
}
