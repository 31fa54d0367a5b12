// handlers/protected/auth/session.rs - GET /api/auth/whoami, POST /logout-all

use axum::extract::{Extension, State};
use serde::Serialize;
use serde_json::{json, Value};

use crate::database::models::{User, UserOrganization};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::server::AppState;
use crate::services::PermissionSet;

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub user: User,
    pub session_id: uuid::Uuid,
    #[serde(flatten)]
    pub permissions: PermissionSet,
    pub is_admin: bool,
    pub organizations: Vec<UserOrganization>,
}

/// GET /api/auth/whoami - the caller's record, platform roles, effective
/// permissions and organization memberships
pub async fn whoami(State(state): State<AppState>, Extension(auth): Extension<AuthUser>) -> ApiResult<WhoAmI> {
    let user = state
        .users
        .find_user_by_id(auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    let permissions = state.authz.effective_permissions(auth.user_id).await?;
    let organizations = state.tenants.memberships(auth.user_id).await?;

    Ok(ApiResponse::success(WhoAmI {
        user,
        session_id: auth.session_id,
        is_admin: permissions.is_admin(),
        permissions,
        organizations,
    }))
}

/// POST /logout-all - end every session of the caller, this one included
pub async fn logout_all(State(state): State<AppState>, Extension(auth): Extension<AuthUser>) -> ApiResult<Value> {
    let removed = state.sessions.revoke_all_sessions(auth.user_id, &auth.origin).await?;
    Ok(ApiResponse::success(json!({ "sessions_revoked": removed })))
}
