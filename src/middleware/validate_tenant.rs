use axum::{
    extract::{Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};

use super::auth::AuthUser;
use crate::database::models::{Organization, TenantRole};
use crate::error::ApiError;
use crate::server::AppState;
use crate::services::TenantError;

pub const ORGANIZATION_HEADER: &str = "x-organization-uuid";
pub const ORGANIZATION_QUERY: &str = "organization";

/// Organization selected by the request and the caller's role in it.
#[derive(Clone, Debug)]
pub struct ValidatedTenant {
    pub organization: Organization,
    pub role: TenantRole,
}

/// Resolves the organization named by `X-Organization-UUID` (or
/// `?organization=`) and the caller's membership in it. Runs after
/// [`super::jwt_auth_middleware`].
pub async fn validate_tenant_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("Authentication required before tenant validation"))?;

    let (parts, body) = request.into_parts();
    let identifier = organization_identifier(&parts).unwrap_or_default();
    request = Request::from_parts(parts, body);

    let conceal = state.config.tenant.conceal_existence;
    let organization = state.tenants.resolve_organization(&identifier).await?;
    let role = match state.tenants.resolve_membership(auth_user.user_id, organization.id).await {
        Ok(role) => role,
        Err(TenantError::NotAMember) => {
            tracing::warn!(
                user_id = %auth_user.user_id,
                organization = %organization.id,
                "Tenant access denied: not a member"
            );
            return Err(if conceal {
                TenantError::OrganizationNotFound.into()
            } else {
                TenantError::NotAMember.into()
            });
        }
        Err(e) => return Err(e.into()),
    };

    tracing::debug!(user_id = %auth_user.user_id, organization = %organization.id, %role, "Tenant validated");
    request.extensions_mut().insert(ValidatedTenant { organization, role });
    Ok(next.run(request).await)
}

/// Header first, then query parameter.
fn organization_identifier(parts: &Parts) -> Option<String> {
    if let Some(value) = parts.headers.get(ORGANIZATION_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(value.trim().to_string());
    }
    let query = parts.uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == ORGANIZATION_QUERY)
        .map(|(_, value)| value.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    fn parts(uri: &str, header: Option<&str>) -> Parts {
        let mut builder = HttpRequest::builder().uri(uri);
        if let Some(value) = header {
            builder = builder.header(ORGANIZATION_HEADER, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn header_wins_over_query() {
        let p = parts("/api/organization?organization=from-query", Some("from-header"));
        assert_eq!(organization_identifier(&p).as_deref(), Some("from-header"));
    }

    #[test]
    fn query_parameter_is_read() {
        let p = parts("/api/organization?page=2&organization=abc", None);
        assert_eq!(organization_identifier(&p).as_deref(), Some("abc"));
        assert_eq!(organization_identifier(&parts("/api/organization", None)), None);
    }
}
