// handlers/protected/organization/users.rs - /api/organization/users[/:id]
//
// Tenant-local user directory. Reads need membership, writes need the
// tenant admin role.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::models::{NewOrganizationUser, OrganizationUser, TenantRole};
use crate::error::ApiError;
use crate::handlers::{json_body, path_params, query_params, PageQuery};
use crate::middleware::{ApiResponse, ApiResult, AuthUser, ValidatedTenant};
use crate::server::AppState;
use crate::services::AuthorizationEngine;

pub async fn users_list(
    State(state): State<AppState>,
    Extension(tenant): Extension<ValidatedTenant>,
    paging: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Vec<OrganizationUser>> {
    let paging = query_params(paging)?;
    let (page, size) = paging.window()?;
    let (users, total) = state
        .tenant_router
        .list_users(&tenant.organization, page, size)
        .await?;
    Ok(ApiResponse::paginated(users, page, size, total))
}

pub async fn users_show(
    State(state): State<AppState>,
    Extension(tenant): Extension<ValidatedTenant>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<OrganizationUser> {
    let id = path_params(id)?;
    let user = state
        .tenant_router
        .get_user(&tenant.organization, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Organization user not found"))?;
    Ok(ApiResponse::success(user))
}

pub async fn users_create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(tenant): Extension<ValidatedTenant>,
    payload: Result<Json<NewOrganizationUser>, JsonRejection>,
) -> ApiResult<OrganizationUser> {
    AuthorizationEngine::require_tenant_role(tenant.role, TenantRole::Admin)?;
    let mut body = json_body(payload)?;
    body.email = crate::database::models::User::normalize_email(&body.email);
    if body.email.is_empty() || body.name.trim().is_empty() {
        return Err(ApiError::bad_request("email and name are required"));
    }
    let created = state
        .tenant_router
        .create_user(&tenant.organization, body, &auth.actor())
        .await?;
    Ok(ApiResponse::created(created))
}

pub async fn users_delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(tenant): Extension<ValidatedTenant>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Value> {
    AuthorizationEngine::require_tenant_role(tenant.role, TenantRole::Admin)?;
    let id = path_params(id)?;
    if !state
        .tenant_router
        .delete_user(&tenant.organization, id, &auth.actor())
        .await?
    {
        return Err(ApiError::not_found("Organization user not found"));
    }
    Ok(ApiResponse::success(json!({ "deleted": id })))
}
