// handlers/public/auth/logout.rs - POST /logout handler

use axum::{extract::State, http::HeaderMap};
use serde_json::{json, Value};

use crate::middleware::{extract_bearer, ApiResponse, ApiResult};
use crate::server::AppState;
use crate::services::RequestOrigin;

/// POST /logout - end the session behind the bearer token. Repeating it
/// with the same token succeeds again.
pub async fn logout(State(state): State<AppState>, origin: RequestOrigin, headers: HeaderMap) -> ApiResult<Value> {
    let token = extract_bearer(&headers)?;
    state.sessions.logout(token, &origin).await?;
    Ok(ApiResponse::success(json!({ "logged_out": true })))
}
