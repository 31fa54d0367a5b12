use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::PgStore;
use crate::database::manager::DatabaseError;
use crate::database::models::{NewSession, Session, SessionRotation};
use crate::database::repository::SessionRepository;

#[async_trait]
impl SessionRepository for PgStore {
    async fn create_session(&self, session: NewSession) -> Result<Session, DatabaseError> {
        let row = sqlx::query_as::<_, Session>(
            "INSERT INTO sessions (id, user_id, access_token_hash, refresh_token_hash, ip_address, user_agent, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.access_token_hash)
        .bind(&session.refresh_token_hash)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.expires_at)
        .fetch_one(self.pool())
        .await?;
        Ok(row)
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>, DatabaseError> {
        let row = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    async fn find_session_by_access_hash(&self, hash: &str) -> Result<Option<Session>, DatabaseError> {
        let row = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE access_token_hash = $1")
            .bind(hash)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    async fn find_session_by_refresh_hash(&self, hash: &str) -> Result<Option<Session>, DatabaseError> {
        let row = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE refresh_token_hash = $1")
            .bind(hash)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    async fn rotate_session(
        &self,
        refresh_hash: &str,
        rotation: SessionRotation,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, DatabaseError> {
        // Row lock on UPDATE makes a concurrent second caller re-check the
        // predicate and miss, since the hash has already changed.
        let row = sqlx::query_as::<_, Session>(
            "UPDATE sessions \
             SET access_token_hash = $2, refresh_token_hash = $3, expires_at = $4, updated_at = $5 \
             WHERE refresh_token_hash = $1 AND expires_at > $5 \
             RETURNING *",
        )
        .bind(refresh_hash)
        .bind(&rotation.access_token_hash)
        .bind(&rotation.refresh_token_hash)
        .bind(rotation.expires_at)
        .bind(now)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
