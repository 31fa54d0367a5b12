// handlers/elevated/organizations.rs - /api/admin/organizations[/:id[/provision]]

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Extension, Path, State};
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::models::{NewOrganization, Organization, OrganizationUpdate};
use crate::error::ApiError;
use crate::handlers::{json_body, path_params};
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::server::AppState;

const RESOURCE: &str = "organization";

/// Store addresses are hidden from the public organization shape; the
/// admin view redacts credentials but keeps the host.
fn admin_view(org: &Organization) -> Value {
    let mut view = json!(org);
    view["write_address"] = json!(crate::database::manager::redact_address(&org.write_address));
    view["read_address"] = json!(org.read_address.as_deref().map(crate::database::manager::redact_address));
    view
}

pub async fn list(State(state): State<AppState>, Extension(auth): Extension<AuthUser>) -> ApiResult<Vec<Value>> {
    state.authz.authorize(auth.user_id, RESOURCE, "read").await?;
    let orgs = state.tenants.list().await?;
    Ok(ApiResponse::success(orgs.iter().map(admin_view).collect()))
}

pub async fn show(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Value> {
    state.authz.authorize(auth.user_id, RESOURCE, "read").await?;
    let org = state.tenants.find(path_params(id)?).await?;
    let members = state.tenants.count_members(org.id).await?;
    let mut view = admin_view(&org);
    view["members"] = json!(members);
    Ok(ApiResponse::success(view))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    payload: Result<Json<NewOrganization>, JsonRejection>,
) -> ApiResult<Value> {
    state.authz.authorize(auth.user_id, RESOURCE, "write").await?;
    let body = json_body(payload)?;
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    if body.write_address.trim().is_empty() {
        return Err(ApiError::bad_request("write_address is required"));
    }
    let org = state.tenants.create(body, &auth.actor()).await?;
    Ok(ApiResponse::created(admin_view(&org)))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<OrganizationUpdate>, JsonRejection>,
) -> ApiResult<Value> {
    state.authz.authorize(auth.user_id, RESOURCE, "write").await?;
    let id = path_params(id)?;
    let body = json_body(payload)?;
    if matches!(body.write_address.as_deref(), Some(w) if w.trim().is_empty()) {
        return Err(ApiError::bad_request("write_address cannot be cleared"));
    }
    let org = state.tenants.update(id, body, &auth.actor()).await?;
    Ok(ApiResponse::success(admin_view(&org)))
}

/// Refused with 409 while members remain.
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Value> {
    state.authz.authorize(auth.user_id, RESOURCE, "delete").await?;
    let id = path_params(id)?;
    state.tenants.delete(id, &auth.actor()).await?;
    Ok(ApiResponse::success(json!({ "deleted": id })))
}

/// Create the tenant namespace and its tables in the tenant's store.
pub async fn provision(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Value> {
    state.authz.authorize(auth.user_id, RESOURCE, "write").await?;
    let org = state.tenants.find(path_params(id)?).await?;
    state.tenant_router.provision(&org, &auth.actor()).await?;
    Ok(ApiResponse::success(json!({ "provisioned": org.id })))
}
