// handlers/protected/organization/members.rs - /api/organization/members
//
// Membership management inside a tenant; owners only.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Extension, Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::models::{TenantRole, UserOrganization};
use crate::error::ApiError;
use crate::handlers::{json_body, path_params};
use crate::middleware::{ApiResponse, ApiResult, AuthUser, ValidatedTenant};
use crate::server::AppState;
use crate::services::AuthorizationEngine;

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub role: TenantRole,
}

pub async fn members_add(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(tenant): Extension<ValidatedTenant>,
    payload: Result<Json<AddMemberRequest>, JsonRejection>,
) -> ApiResult<UserOrganization> {
    AuthorizationEngine::require_tenant_role(tenant.role, TenantRole::Owner)?;
    let body = json_body(payload)?;

    let user_id = match (body.user_id, body.email.as_deref()) {
        (Some(id), _) => state.users.find_user_by_id(id).await?.map(|u| u.id),
        (None, Some(email)) => state.users.find_user_by_email(email).await?.map(|u| u.id),
        (None, None) => return Err(ApiError::bad_request("user_id or email is required")),
    }
    .ok_or_else(|| ApiError::not_found("User not found").with_code("USER_NOT_FOUND"))?;

    let edge = state
        .tenants
        .add_member(tenant.organization.id, user_id, body.role, &auth.actor())
        .await?;
    Ok(ApiResponse::created(edge))
}

pub async fn members_remove(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(tenant): Extension<ValidatedTenant>,
    user_id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Value> {
    AuthorizationEngine::require_tenant_role(tenant.role, TenantRole::Owner)?;
    let user_id = path_params(user_id)?;
    if user_id == auth.user_id {
        return Err(ApiError::conflict("Owners cannot remove themselves"));
    }
    if !state
        .tenants
        .remove_member(tenant.organization.id, user_id, &auth.actor())
        .await?
    {
        return Err(ApiError::not_found("Membership not found"));
    }
    Ok(ApiResponse::success(json!({ "removed": user_id })))
}
