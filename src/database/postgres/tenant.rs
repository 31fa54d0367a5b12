use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::database::manager::{DatabaseError, DatabaseManager, TenantConnection};
use crate::database::models::{NewOrganizationUser, OrganizationUser, User};
use crate::database::query_builder::{TenantQuery, TenantScope};
use crate::database::repository::OrganizationUserRepository;

/// Tenant-local user directory living in each tenant's own store.
#[derive(Clone)]
pub struct PgTenantDirectory {
    manager: Arc<DatabaseManager>,
}

impl PgTenantDirectory {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self { manager }
    }

    async fn open(&self, scope: &TenantScope) -> Result<TenantConnection, DatabaseError> {
        self.manager.tenant_pools().open(&scope.address).await
    }
}

#[async_trait]
impl OrganizationUserRepository for PgTenantDirectory {
    async fn provision_namespace(&self, scope: &TenantScope) -> Result<(), DatabaseError> {
        let mut conn = self.open(scope).await?;
        sqlx::query(&TenantQuery::CreateNamespace.render(&scope.namespace))
            .execute(&mut *conn)
            .await?;
        sqlx::query(&TenantQuery::CreateUsersTable.render(&scope.namespace))
            .execute(&mut *conn)
            .await?;
        info!(organization = %scope.organization_id, "Provisioned tenant namespace {}", scope.namespace.name());
        Ok(())
    }

    async fn list_organization_users(
        &self,
        scope: &TenantScope,
        page: i64,
        size: i64,
    ) -> Result<(Vec<OrganizationUser>, i64), DatabaseError> {
        let mut conn = self.open(scope).await?;
        let total = sqlx::query_scalar::<_, i64>(&TenantQuery::CountUsers.render(&scope.namespace))
            .fetch_one(&mut *conn)
            .await?;
        let rows = sqlx::query_as::<_, OrganizationUser>(&TenantQuery::ListUsers.render(&scope.namespace))
            .bind(size)
            .bind((page.max(1) - 1).saturating_mul(size))
            .fetch_all(&mut *conn)
            .await?;
        Ok((rows, total))
    }

    async fn find_organization_user(
        &self,
        scope: &TenantScope,
        id: Uuid,
    ) -> Result<Option<OrganizationUser>, DatabaseError> {
        let mut conn = self.open(scope).await?;
        let row = sqlx::query_as::<_, OrganizationUser>(&TenantQuery::FindUser.render(&scope.namespace))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    async fn create_organization_user(
        &self,
        scope: &TenantScope,
        user: NewOrganizationUser,
    ) -> Result<OrganizationUser, DatabaseError> {
        let mut conn = self.open(scope).await?;
        let row = sqlx::query_as::<_, OrganizationUser>(&TenantQuery::InsertUser.render(&scope.namespace))
            .bind(Uuid::new_v4())
            .bind(User::normalize_email(&user.email))
            .bind(&user.name)
            .bind(&user.sso_subject)
            .fetch_one(&mut *conn)
            .await?;
        Ok(row)
    }

    async fn delete_organization_user(&self, scope: &TenantScope, id: Uuid) -> Result<bool, DatabaseError> {
        let mut conn = self.open(scope).await?;
        let result = sqlx::query(&TenantQuery::DeleteUser.render(&scope.namespace))
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
