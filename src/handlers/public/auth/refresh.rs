// handlers/public/auth/refresh.rs - POST /refresh handler

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::Deserialize;

use crate::handlers::json_body;
use crate::middleware::{ApiResponse, ApiResult};
use crate::server::AppState;
use crate::services::{RequestOrigin, TokenPair};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(alias = "refresh_token")]
    pub refresh_token: String,
}

/// POST /refresh - rotate the session's tokens. The presented refresh token
/// is spent whether or not the caller keeps the response.
pub async fn refresh(
    State(state): State<AppState>,
    origin: RequestOrigin,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> ApiResult<TokenPair> {
    let body = json_body(payload)?;
    let pair = state.sessions.refresh(&body.refresh_token, &origin).await?;
    Ok(ApiResponse::success(pair))
}
