use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::origin::origin_from_parts;
use crate::server::AppState;
use crate::services::{Actor, RequestOrigin};

/// Authenticated caller, injected by [`jwt_auth_middleware`].
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub email: String,
    pub origin: RequestOrigin,
}

impl AuthUser {
    pub fn actor(&self) -> Actor {
        Actor::user(self.user_id, Some(self.email.clone()), self.origin.clone())
    }
}

/// Validates the bearer token, confirms the account is still active and
/// injects [`AuthUser`].
pub async fn jwt_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let token = extract_bearer(&parts.headers)?;
    let claims = state.sessions.validate_token(token).await?;

    let user = state
        .users
        .find_user_by_id(claims.sub)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| {
            tracing::warn!(user_id = %claims.sub, "Token presented for missing or inactive user");
            ApiError::unauthorized("Access token invalid").with_code("TOKEN_INVALID")
        })?;

    let auth_user = AuthUser {
        user_id: user.id,
        session_id: claims.sid,
        email: user.email,
        origin: origin_from_parts(&parts, state.config.api.trust_forwarded_for),
    };

    let mut request = Request::from_parts(parts, body);
    request.extensions_mut().insert(auth_user);
    Ok(next.run(request).await)
}

/// Extract the token from `Authorization: Bearer <token>`
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, ApiError> {
    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("Missing Authorization header").with_code("MISSING_TOKEN"))?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| ApiError::unauthorized("Invalid Authorization header format"))?;

    match auth_str.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        Some(_) => Err(ApiError::unauthorized("Empty bearer token")),
        None => Err(ApiError::unauthorized("Authorization header must use Bearer token format")),
    }
}
