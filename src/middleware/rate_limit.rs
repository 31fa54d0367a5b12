use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Duration;

use crate::error::ApiError;
use crate::middleware::origin::origin_from_parts;
use crate::server::AppState;
use crate::services::RateDecision;

/// Throttles by client address and path, advertising the window in
/// `X-RateLimit-*` headers.
pub async fn rate_limit_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let api = &state.config.api;
    if !api.enable_rate_limiting {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let client = origin_from_parts(&parts, api.trust_forwarded_for)
        .ip_address
        .unwrap_or_else(|| "unknown".to_string());
    let key = format!("{}:{}", client, parts.uri.path());
    let request = Request::from_parts(parts, body);

    let decision = state
        .rate_limiter
        .allow(&key, api.rate_limit_requests, Duration::from_secs(api.rate_limit_window_secs))
        .await;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        tracing::warn!(key = %key, retry_after = decision.retry_after, "Rate limit exceeded");
        ApiError::too_many_requests(decision.retry_after).into_response()
    };
    apply_headers(response.headers_mut(), &decision);
    response
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    let values = [
        ("x-ratelimit-limit", decision.limit.to_string()),
        ("x-ratelimit-remaining", decision.remaining.to_string()),
        ("x-ratelimit-reset", decision.reset_at.timestamp().to_string()),
    ];
    for (name, value) in values {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}
