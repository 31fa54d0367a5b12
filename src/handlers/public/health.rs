// handlers/public/health.rs - GET / and GET /health

use axum::{extract::State, response::IntoResponse};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::ApiResponse;
use crate::server::AppState;

pub async fn root() -> ApiResponse<Value> {
    ApiResponse::success(json!({
        "name": "Portal API (Rust)",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "public": "/login, /refresh, /register, /password-reset/*, /health",
            "session": "/logout, /logout-all, /api/auth/*",
            "tenant": "/api/organization/*, /api/integrations/* (X-Organization-UUID)",
            "admin": "/audit-logs, /api/admin/*",
        }
    }))
}

/// GET /health - 200 when the credential store answers, 503 otherwise
pub async fn health(State(state): State<AppState>) -> axum::response::Response {
    let now = chrono::Utc::now();
    match state.health.ping().await {
        Ok(()) => ApiResponse::success(json!({ "status": "ok", "timestamp": now, "database": "ok" })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            ApiError::service_unavailable("Database unavailable")
                .with_details(json!({ "status": "degraded", "timestamp": now }))
                .into_response()
        }
    }
}
