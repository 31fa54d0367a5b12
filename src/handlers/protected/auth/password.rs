// handlers/protected/auth/password.rs - PUT /api/auth/password

use axum::extract::{rejection::JsonRejection, Extension, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::handlers::json_body;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(alias = "current_password")]
    pub current_password: String,
    #[serde(alias = "new_password")]
    pub new_password: String,
}

/// PUT /api/auth/password - change the caller's password. Every session,
/// including the current one, is revoked.
pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let body = json_body(payload)?;
    state
        .accounts
        .change_password(auth.user_id, &body.current_password, &body.new_password, &auth.origin)
        .await?;
    Ok(ApiResponse::success(json!({ "password_changed": true })))
}
