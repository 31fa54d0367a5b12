// handlers/public/auth/register.rs - POST /register handler

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::Deserialize;

use crate::database::models::User;
use crate::handlers::json_body;
use crate::middleware::{ApiResponse, ApiResult};
use crate::server::AppState;
use crate::services::RequestOrigin;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

/// POST /register - self-service sign-up, when enabled
pub async fn register(
    State(state): State<AppState>,
    origin: RequestOrigin,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<User> {
    let body = json_body(payload)?;
    let user = state
        .accounts
        .register(&body.email, &body.name, &body.password, &origin)
        .await?;
    Ok(ApiResponse::created(user))
}
