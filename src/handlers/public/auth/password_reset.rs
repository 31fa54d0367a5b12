// handlers/public/auth/password_reset.rs - POST /password-reset/{request,confirm}

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Environment;
use crate::handlers::json_body;
use crate::middleware::{ApiResponse, ApiResult};
use crate::server::AppState;
use crate::services::RequestOrigin;

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetConfirm {
    pub token: String,
    #[serde(alias = "new_password")]
    pub new_password: String,
}

/// POST /password-reset/request - always answers the same way so the
/// endpoint cannot be used to probe for registered emails. Delivery of the
/// token is outside this service; development builds echo it back.
pub async fn password_reset_request(
    State(state): State<AppState>,
    origin: RequestOrigin,
    payload: Result<Json<ResetRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let body = json_body(payload)?;
    let token = state.accounts.request_password_reset(&body.email, &origin).await?;

    let mut data = json!({ "message": "If the account exists, a reset token has been issued" });
    if state.config.environment == Environment::Development {
        if let Some(token) = token {
            data["reset_token"] = json!(token);
        }
    }
    Ok(ApiResponse::success(data))
}

/// POST /password-reset/confirm - spend a reset token and set a new password
pub async fn password_reset_confirm(
    State(state): State<AppState>,
    origin: RequestOrigin,
    payload: Result<Json<ResetConfirm>, JsonRejection>,
) -> ApiResult<Value> {
    let body = json_body(payload)?;
    state
        .accounts
        .reset_password(&body.token, &body.new_password, &origin)
        .await?;
    Ok(ApiResponse::success(json!({ "password_reset": true })))
}
