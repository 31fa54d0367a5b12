use async_trait::async_trait;
use uuid::Uuid;

use super::PgStore;
use crate::database::manager::DatabaseError;
use crate::database::models::{NewOrganization, Organization, OrganizationUpdate, TenantRole, UserOrganization};
use crate::database::repository::OrganizationRepository;

#[async_trait]
impl OrganizationRepository for PgStore {
    async fn create_organization(&self, org: NewOrganization) -> Result<Organization, DatabaseError> {
        let row = sqlx::query_as::<_, Organization>(
            "INSERT INTO organizations (id, name, sso_active, write_address, read_address) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(org.id.unwrap_or_else(Uuid::new_v4))
        .bind(&org.name)
        .bind(org.sso_active)
        .bind(&org.write_address)
        .bind(&org.read_address)
        .fetch_one(self.pool())
        .await?;
        Ok(row)
    }

    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, DatabaseError> {
        let row = sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>, DatabaseError> {
        let rows = sqlx::query_as::<_, Organization>("SELECT * FROM organizations ORDER BY name, id")
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }

    async fn update_organization(
        &self,
        id: Uuid,
        update: OrganizationUpdate,
    ) -> Result<Option<Organization>, DatabaseError> {
        let clear_or_set_read = update.read_address.is_some();
        let row = sqlx::query_as::<_, Organization>(
            "UPDATE organizations SET \
             name = COALESCE($2, name), \
             sso_active = COALESCE($3, sso_active), \
             write_address = COALESCE($4, write_address), \
             read_address = CASE WHEN $5 THEN $6 ELSE read_address END, \
             updated_at = now() \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(&update.name)
        .bind(update.sso_active)
        .bind(&update.write_address)
        .bind(clear_or_set_read)
        .bind(update.read_address.flatten())
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    async fn delete_organization(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM organizations WHERE id = $1 \
             AND NOT EXISTS (SELECT 1 FROM user_organizations WHERE organization_id = $1)",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_members(&self, organization_id: Uuid) -> Result<i64, DatabaseError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM user_organizations WHERE organization_id = $1")
            .bind(organization_id)
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    async fn find_membership(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<UserOrganization>, DatabaseError> {
        let row = sqlx::query_as::<_, UserOrganization>(
            "SELECT * FROM user_organizations WHERE user_id = $1 AND organization_id = $2",
        )
        .bind(user_id)
        .bind(organization_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    async fn list_memberships_for_user(&self, user_id: Uuid) -> Result<Vec<UserOrganization>, DatabaseError> {
        let rows = sqlx::query_as::<_, UserOrganization>(
            "SELECT * FROM user_organizations WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn upsert_membership(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        role: TenantRole,
    ) -> Result<UserOrganization, DatabaseError> {
        let row = sqlx::query_as::<_, UserOrganization>(
            "INSERT INTO user_organizations (user_id, organization_id, role) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, organization_id) DO UPDATE SET role = EXCLUDED.role \
             RETURNING *",
        )
        .bind(user_id)
        .bind(organization_id)
        .bind(role.as_str())
        .fetch_one(self.pool())
        .await?;
        Ok(row)
    }

    async fn remove_membership(&self, user_id: Uuid, organization_id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM user_organizations WHERE user_id = $1 AND organization_id = $2")
            .bind(user_id)
            .bind(organization_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
