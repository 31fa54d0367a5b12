use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{self, Claims, TokenError, TokenSigner};
use crate::config::SecurityConfig;
use crate::database::models::{AuditOutcome, NewAuditLog, NewSession, SessionRotation, User};
use crate::database::{DatabaseError, SessionRepository, UserRepository};
use crate::services::audit::AuditRecorder;
use crate::services::RequestOrigin;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("Access token expired")]
    TokenExpired,

    #[error("Access token invalid")]
    TokenInvalid,

    #[error("Session not found or expired")]
    SessionNotFound,

    #[error("Credential error: {0}")]
    Credential(String),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<TokenError> for SessionError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => SessionError::TokenExpired,
            TokenError::Invalid => SessionError::TokenInvalid,
            TokenError::Signing(msg) => SessionError::Credential(msg),
        }
    }
}

/// Freshly minted credentials.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    #[serde(skip)]
    pub user_id: Uuid,
    #[serde(skip)]
    pub session_id: Uuid,
    #[serde(skip)]
    pub session_expires_at: DateTime<Utc>,
}

/// Issues, validates, rotates and revokes sessions.
pub struct SessionManager {
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionRepository>,
    signer: TokenSigner,
    refresh_ttl: Duration,
    check_revocation: bool,
    audit: Arc<AuditRecorder>,
}

impl SessionManager {
    pub fn new(
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionRepository>,
        security: &SecurityConfig,
        audit: Arc<AuditRecorder>,
    ) -> Self {
        Self {
            users,
            sessions,
            signer: TokenSigner::from_config(security),
            refresh_ttl: Duration::hours(security.refresh_token_ttl_hours),
            check_revocation: security.check_session_revocation,
            audit,
        }
    }

    pub async fn login(&self, email: &str, password: &str, origin: &RequestOrigin) -> Result<TokenPair, SessionError> {
        let email = User::normalize_email(email);
        let user = self.users.find_user_by_email(&email).await?;

        let verified = auth::verify_password_blocking(
            password,
            user.as_ref().and_then(|u| u.password_hash.as_deref()),
        )
        .await;

        let user = match user {
            Some(user) if verified => user,
            found => {
                self.audit_login_failure(found.map(|u| u.id), &email, "invalid_credentials", origin)
                    .await;
                return Err(SessionError::InvalidCredentials);
            }
        };

        if !user.is_active {
            self.audit_login_failure(Some(user.id), &email, "account_disabled", origin)
                .await;
            return Err(SessionError::AccountDisabled);
        }

        let now = Utc::now();
        self.users.touch_last_login(user.id, now).await?;
        let pair = self.open_session(user.id, origin, now).await?;

        info!(user_id = %user.id, session_id = %pair.session_id, "User logged in");
        self.audit
            .record(
                NewAuditLog::new("login", "session", AuditOutcome::Success)
                    .actor(Some(user.id), Some(&user.email))
                    .resource_id(pair.session_id)
                    .origin(origin.ip_address.clone(), origin.user_agent.clone()),
            )
            .await;

        Ok(pair)
    }

    /// Verify signature and expiry, then optionally confirm the session still
    /// holds this exact access token.
    pub async fn validate_token(&self, token: &str) -> Result<Claims, SessionError> {
        let claims = self.signer.verify(token)?;
        if self.check_revocation {
            match self.sessions.find_session(claims.sid).await? {
                Some(session)
                    if session.user_id == claims.sub
                        && session.access_token_hash == auth::hash_token(token)
                        && !session.is_expired(Utc::now()) => {}
                _ => return Err(SessionError::TokenInvalid),
            }
        }
        Ok(claims)
    }

    /// Exchange a refresh token for a new pair. The old refresh token stops
    /// working the moment this succeeds.
    pub async fn refresh(&self, refresh_token: &str, origin: &RequestOrigin) -> Result<TokenPair, SessionError> {
        let now = Utc::now();
        let old_hash = auth::hash_token(refresh_token);

        let session = match self.sessions.find_session_by_refresh_hash(&old_hash).await? {
            Some(session) if !session.is_expired(now) => session,
            _ => {
                self.audit_refresh_failure(None, origin).await;
                return Err(SessionError::SessionNotFound);
            }
        };

        let (access_token, _) = self.signer.issue(session.user_id, session.id, now)?;
        let new_refresh = auth::generate_opaque_token();
        let expires_at = now + self.refresh_ttl;
        let rotation = SessionRotation {
            access_token_hash: auth::hash_token(&access_token),
            refresh_token_hash: auth::hash_token(&new_refresh),
            expires_at,
        };

        // A concurrent refresh with the same token loses here.
        let Some(rotated) = self.sessions.rotate_session(&old_hash, rotation, now).await? else {
            self.audit_refresh_failure(Some(session.user_id), origin).await;
            return Err(SessionError::SessionNotFound);
        };

        let email = self.actor_email(rotated.user_id).await;
        self.audit
            .record(
                NewAuditLog::new("refresh", "session", AuditOutcome::Success)
                    .actor(Some(rotated.user_id), email.as_deref())
                    .resource_id(rotated.id)
                    .origin(origin.ip_address.clone(), origin.user_agent.clone()),
            )
            .await;

        Ok(TokenPair {
            token: access_token,
            refresh_token: new_refresh,
            expires_in: self.signer.access_ttl().num_seconds(),
            user_id: rotated.user_id,
            session_id: rotated.id,
            session_expires_at: expires_at,
        })
    }

    /// Delete the session behind `token`. An already deleted session is not an
    /// error; an expired access token still identifies its session.
    pub async fn logout(&self, token: &str, origin: &RequestOrigin) -> Result<(), SessionError> {
        let claims = self.signer.verify_ignoring_expiry(token)?;
        let removed = self.sessions.delete_session(claims.sid).await?;
        if removed {
            let email = self.actor_email(claims.sub).await;
            self.audit
                .record(
                    NewAuditLog::new("logout", "session", AuditOutcome::Success)
                        .actor(Some(claims.sub), email.as_deref())
                        .resource_id(claims.sid)
                        .origin(origin.ip_address.clone(), origin.user_agent.clone()),
                )
                .await;
        }
        Ok(())
    }

    pub async fn revoke_all_sessions(&self, user_id: Uuid, origin: &RequestOrigin) -> Result<u64, SessionError> {
        let removed = self.sessions.delete_user_sessions(user_id).await?;
        info!(user_id = %user_id, removed, "Revoked all sessions");
        let email = self.actor_email(user_id).await;
        self.audit
            .record(
                NewAuditLog::new("revoke_sessions", "session", AuditOutcome::Success)
                    .actor(Some(user_id), email.as_deref())
                    .details(json!({ "removed": removed }))
                    .origin(origin.ip_address.clone(), origin.user_agent.clone()),
            )
            .await;
        Ok(removed)
    }

    pub async fn delete_expired_sessions(&self) -> Result<u64, SessionError> {
        let removed = self.sessions.delete_expired_sessions(Utc::now()).await?;
        if removed > 0 {
            info!(removed, "Swept expired sessions");
        }
        Ok(removed)
    }

    async fn open_session(&self, user_id: Uuid, origin: &RequestOrigin, now: DateTime<Utc>) -> Result<TokenPair, SessionError> {
        let session_id = Uuid::new_v4();
        let (access_token, _) = self.signer.issue(user_id, session_id, now)?;
        let refresh_token = auth::generate_opaque_token();
        let expires_at = now + self.refresh_ttl;

        self.sessions
            .create_session(NewSession {
                id: session_id,
                user_id,
                access_token_hash: auth::hash_token(&access_token),
                refresh_token_hash: auth::hash_token(&refresh_token),
                ip_address: origin.ip_address.clone(),
                user_agent: origin.user_agent.clone(),
                expires_at,
            })
            .await?;

        Ok(TokenPair {
            token: access_token,
            refresh_token,
            expires_in: self.signer.access_ttl().num_seconds(),
            user_id,
            session_id,
            session_expires_at: expires_at,
        })
    }

    async fn actor_email(&self, user_id: Uuid) -> Option<String> {
        match self.users.find_user_by_id(user_id).await {
            Ok(user) => user.map(|u| u.email),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Could not resolve audit actor email");
                None
            }
        }
    }

    async fn audit_login_failure(&self, user_id: Option<Uuid>, email: &str, reason: &str, origin: &RequestOrigin) {
        warn!(email = %email, reason, "Login failed");
        self.audit
            .record(
                NewAuditLog::new("login", "session", AuditOutcome::Failure)
                    .actor(user_id, Some(email))
                    .details(json!({ "reason": reason }))
                    .origin(origin.ip_address.clone(), origin.user_agent.clone()),
            )
            .await;
    }

    async fn audit_refresh_failure(&self, user_id: Option<Uuid>, origin: &RequestOrigin) {
        let email = match user_id {
            Some(id) => self.actor_email(id).await,
            None => None,
        };
        self.audit
            .record(
                NewAuditLog::new("refresh", "session", AuditOutcome::Failure)
                    .actor(user_id, email.as_deref())
                    .details(json!({ "reason": "session_not_found" }))
                    .origin(origin.ip_address.clone(), origin.user_agent.clone()),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::database::models::{AuditFilter, NewUser};
    use crate::database::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, SessionManager, Arc<AuditRecorder>, User) {
        let config = AppConfig::development();
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(AuditRecorder::new(store.clone(), &config.audit));
        let manager = SessionManager::new(store.clone(), store.clone(), &config.security, audit.clone());
        let user = store
            .create_user(NewUser {
                email: "a@x.com".to_string(),
                name: "A".to_string(),
                password_hash: Some(auth::hash_password("correct horse").unwrap()),
                sso_provider: None,
                sso_subject: None,
            })
            .await
            .unwrap();
        (store, manager, audit, user)
    }

    #[tokio::test]
    async fn login_then_validate() {
        let (_, manager, _, user) = setup().await;
        let pair = manager.login("A@x.com", "correct horse", &RequestOrigin::default()).await.unwrap();
        let claims = manager.validate_token(&pair.token).await.unwrap();
        assert_eq!(claims.sub, user.id);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() {
        let (_, manager, _, _) = setup().await;
        let origin = RequestOrigin::default();
        assert!(matches!(
            manager.login("a@x.com", "nope", &origin).await,
            Err(SessionError::InvalidCredentials)
        ));
        assert!(matches!(
            manager.login("ghost@x.com", "nope", &origin).await,
            Err(SessionError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn refresh_succeeds_exactly_once() {
        let (_, manager, _, _) = setup().await;
        let origin = RequestOrigin::default();
        let pair = manager.login("a@x.com", "correct horse", &origin).await.unwrap();

        let rotated = manager.refresh(&pair.refresh_token, &origin).await.unwrap();
        assert_ne!(rotated.refresh_token, pair.refresh_token);
        assert!(matches!(
            manager.refresh(&pair.refresh_token, &origin).await,
            Err(SessionError::SessionNotFound)
        ));
        // the superseded access token no longer validates
        assert!(matches!(manager.validate_token(&pair.token).await, Err(SessionError::TokenInvalid)));
        assert!(manager.validate_token(&rotated.token).await.is_ok());
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let (store, manager, _, _) = setup().await;
        let origin = RequestOrigin::default();
        let pair = manager.login("a@x.com", "correct horse", &origin).await.unwrap();

        manager.logout(&pair.token, &origin).await.unwrap();
        manager.logout(&pair.token, &origin).await.unwrap();
        assert!(store.find_session(pair.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disabled_account_gets_no_session() {
        let (store, manager, audit, user) = setup().await;
        store.set_user_active(user.id, false).await.unwrap();

        let result = manager.login("a@x.com", "correct horse", &RequestOrigin::default()).await;
        assert!(matches!(result, Err(SessionError::AccountDisabled)));
        assert_eq!(store.delete_user_sessions(user.id).await.unwrap(), 0);

        let failures = audit
            .query(AuditFilter {
                action: Some("login".to_string()),
                outcome: Some(AuditOutcome::Failure),
                page: 1,
                size: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failures.total, 1);
    }

    #[tokio::test]
    async fn revoke_all_ends_every_session() {
        let (_, manager, _, user) = setup().await;
        let origin = RequestOrigin::default();
        let first = manager.login("a@x.com", "correct horse", &origin).await.unwrap();
        let second = manager.login("a@x.com", "correct horse", &origin).await.unwrap();

        assert_eq!(manager.revoke_all_sessions(user.id, &origin).await.unwrap(), 2);
        assert!(manager.validate_token(&first.token).await.is_err());
        assert!(manager.validate_token(&second.token).await.is_err());
    }
}
