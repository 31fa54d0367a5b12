// handlers/elevated/roles.rs - /api/admin/roles[/:id[/permissions]]

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Extension, Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::models::{PermissionKey, Role, RoleWithPermissions};
use crate::handlers::{json_body, path_params};
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::server::AppState;

const RESOURCE: &str = "role";

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// `{"permissions": ["integration:read", ...]}`
#[derive(Debug, Deserialize)]
pub struct ReplacePermissionsRequest {
    pub permissions: Vec<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<RoleWithPermissions>> {
    state.authz.authorize(auth.user_id, RESOURCE, "read").await?;
    Ok(ApiResponse::success(state.roles.list().await?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    payload: Result<Json<CreateRoleRequest>, JsonRejection>,
) -> ApiResult<Role> {
    state.authz.authorize(auth.user_id, RESOURCE, "write").await?;
    let body = json_body(payload)?;
    let display = body.display_name.as_deref().unwrap_or(&body.name);
    let role = state.roles.create(&body.name, display, &auth.actor()).await?;
    Ok(ApiResponse::created(role))
}

/// System roles answer 409.
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Value> {
    state.authz.authorize(auth.user_id, RESOURCE, "delete").await?;
    let id = path_params(id)?;
    state.roles.delete(id, &auth.actor()).await?;
    Ok(ApiResponse::success(json!({ "deleted": id })))
}

/// Replace the whole permission set. Applies to holders on their next request.
pub async fn replace_permissions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ReplacePermissionsRequest>, JsonRejection>,
) -> ApiResult<Vec<PermissionKey>> {
    state.authz.authorize(auth.user_id, RESOURCE, "write").await?;
    let id = path_params(id)?;
    let body = json_body(payload)?;
    let keys = state
        .roles
        .replace_permissions(id, &body.permissions, &auth.actor())
        .await?;
    Ok(ApiResponse::success(keys))
}
