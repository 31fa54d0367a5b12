use async_trait::async_trait;
use sqlx::{PgConnection, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use super::PgStore;
use crate::database::manager::DatabaseError;
use crate::database::models::{NewRole, PermissionKey, Role, RoleGrant, RoleWithPermissions};
use crate::database::repository::RoleRepository;

async fn upsert_permission(conn: &mut PgConnection, permission: &PermissionKey) -> Result<Uuid, DatabaseError> {
    let id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO permissions (id, resource, action) VALUES ($1, $2, $3) \
         ON CONFLICT (resource, action) DO UPDATE SET resource = EXCLUDED.resource \
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(&permission.resource)
    .bind(&permission.action)
    .fetch_one(conn)
    .await?;
    Ok(id)
}

async fn link_permission(
    tx: &mut Transaction<'_, Postgres>,
    role_id: Uuid,
    permission: &PermissionKey,
) -> Result<(), DatabaseError> {
    let permission_id = upsert_permission(&mut **tx, permission).await?;
    sqlx::query("INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(role_id)
        .bind(permission_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl RoleRepository for PgStore {
    async fn list_roles(&self) -> Result<Vec<RoleWithPermissions>, DatabaseError> {
        let roles = sqlx::query_as::<_, Role>("SELECT * FROM roles ORDER BY name")
            .fetch_all(self.pool())
            .await?;
        let links = sqlx::query_as::<_, (Uuid, String, String)>(
            "SELECT rp.role_id, p.resource, p.action \
             FROM role_permissions rp JOIN permissions p ON p.id = rp.permission_id \
             ORDER BY p.resource, p.action",
        )
        .fetch_all(self.pool())
        .await?;

        let mut by_role: HashMap<Uuid, Vec<PermissionKey>> = HashMap::new();
        for (role_id, resource, action) in links {
            by_role.entry(role_id).or_default().push(PermissionKey::new(resource, action));
        }

        Ok(roles
            .into_iter()
            .map(|role| {
                let permissions = by_role.remove(&role.id).unwrap_or_default();
                RoleWithPermissions { role, permissions }
            })
            .collect())
    }

    async fn find_role(&self, id: Uuid) -> Result<Option<Role>, DatabaseError> {
        let row = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, DatabaseError> {
        let row = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    async fn create_role(&self, role: NewRole) -> Result<Role, DatabaseError> {
        let row = sqlx::query_as::<_, Role>(
            "INSERT INTO roles (id, name, display_name, is_system) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&role.name)
        .bind(&role.display_name)
        .bind(role.is_system)
        .fetch_one(self.pool())
        .await?;
        Ok(row)
    }

    async fn delete_role(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1 AND is_system = FALSE")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_role_permissions(
        &self,
        role_id: Uuid,
        permissions: &[PermissionKey],
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;

        // Lock the role row so concurrent rewrites of the same role serialize.
        sqlx::query("SELECT id FROM roles WHERE id = $1 FOR UPDATE")
            .bind(role_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("role {}", role_id)))?;

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;

        for permission in permissions {
            link_permission(&mut tx, role_id, permission).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn grant_permission(&self, role_id: Uuid, permission: &PermissionKey) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;
        link_permission(&mut tx, role_id, permission).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(role_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id)
            .bind(role_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn role_grants_for_user(&self, user_id: Uuid) -> Result<Vec<RoleGrant>, DatabaseError> {
        let rows = sqlx::query_as::<_, (String, Option<String>, Option<String>)>(
            "SELECT r.name, p.resource, p.action \
             FROM user_roles ur \
             JOIN roles r ON r.id = ur.role_id \
             LEFT JOIN role_permissions rp ON rp.role_id = r.id \
             LEFT JOIN permissions p ON p.id = rp.permission_id \
             WHERE ur.user_id = $1",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(role_name, resource, action)| RoleGrant {
                role_name,
                permission: resource.zip(action).map(|(r, a)| PermissionKey::new(r, a)),
            })
            .collect())
    }
}
