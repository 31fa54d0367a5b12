// handlers/protected/organization/show.rs - GET /api/organization

use axum::extract::Extension;
use serde_json::{json, Value};

use crate::middleware::{ApiResponse, ApiResult, ValidatedTenant};

/// GET /api/organization - the selected organization and the caller's role in it
pub async fn show(Extension(tenant): Extension<ValidatedTenant>) -> ApiResult<Value> {
    Ok(ApiResponse::success(json!({
        "organization": tenant.organization,
        "role": tenant.role,
    })))
}
