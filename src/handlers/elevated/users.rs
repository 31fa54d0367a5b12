// handlers/elevated/users.rs - /api/admin/users/:id/...

use axum::extract::rejection::PathRejection;
use axum::extract::{Extension, Path, State};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::handlers::path_params;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::server::AppState;

/// POST /api/admin/users/:id/roles/:role_id
pub async fn assign_role(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ids: Result<Path<(Uuid, Uuid)>, PathRejection>,
) -> ApiResult<Value> {
    state.authz.authorize(auth.user_id, "role", "assign").await?;
    let (user_id, role_id) = path_params(ids)?;
    let added = state.roles.assign(user_id, role_id, &auth.actor()).await?;
    Ok(ApiResponse::success(json!({ "user_id": user_id, "role_id": role_id, "added": added })))
}

/// DELETE /api/admin/users/:id/roles/:role_id
pub async fn revoke_role(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ids: Result<Path<(Uuid, Uuid)>, PathRejection>,
) -> ApiResult<Value> {
    state.authz.authorize(auth.user_id, "role", "assign").await?;
    let (user_id, role_id) = path_params(ids)?;
    let removed = state.roles.revoke(user_id, role_id, &auth.actor()).await?;
    Ok(ApiResponse::success(json!({ "user_id": user_id, "role_id": role_id, "removed": removed })))
}

/// POST /api/admin/users/:id/deactivate - soft delete and end every session
pub async fn deactivate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Value> {
    state.authz.authorize(auth.user_id, "user", "deactivate").await?;
    let user_id = path_params(id)?;
    state.accounts.deactivate(user_id, &auth.actor()).await?;
    Ok(ApiResponse::success(json!({ "deactivated": user_id })))
}
