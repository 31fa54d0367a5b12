// handlers/public/auth/login.rs - POST /login handler

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::Deserialize;

use crate::handlers::json_body;
use crate::middleware::{ApiResponse, ApiResult};
use crate::server::AppState;
use crate::services::{RequestOrigin, TokenPair};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// POST /login - exchange email and password for a token pair
///
/// ```json
/// { "success": true, "data": { "token": "...", "refreshToken": "...", "expiresIn": 3600 } }
/// ```
pub async fn login(
    State(state): State<AppState>,
    origin: RequestOrigin,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<TokenPair> {
    let body = json_body(payload)?;
    let pair = state.sessions.login(&body.email, &body.password, &origin).await?;
    Ok(ApiResponse::success(pair))
}
