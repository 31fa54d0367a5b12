// handlers/protected/integrations.rs - /api/integrations[/:name/invoke]
//
// Tenant-scoped gateway to registered third-party clients. Listing needs
// integration:read, invoking needs integration:write.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Extension, Path, State};
use axum::Json;
use serde_json::Value;

use crate::handlers::{json_body, path_params};
use crate::middleware::{ApiResponse, ApiResult, AuthUser, ValidatedTenant};
use crate::server::AppState;
use crate::services::integrations::IntegrationInfo;

pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(_tenant): Extension<ValidatedTenant>,
) -> ApiResult<Vec<IntegrationInfo>> {
    state.authz.authorize(auth.user_id, "integration", "read").await?;
    Ok(ApiResponse::success(state.integrations.list()))
}

pub async fn invoke(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(tenant): Extension<ValidatedTenant>,
    name: Result<Path<String>, PathRejection>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let name = path_params(name)?;
    state.authz.authorize(auth.user_id, "integration", "write").await?;
    let request = json_body(payload)?;
    let result = state
        .integrations
        .invoke(&name, tenant.organization.id, request, &auth.actor())
        .await?;
    Ok(ApiResponse::success(result))
}
