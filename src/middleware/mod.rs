pub mod auth;
pub mod origin;
pub mod rate_limit;
pub mod response;
pub mod validate_tenant;

pub use auth::{extract_bearer, jwt_auth_middleware, AuthUser};
pub use rate_limit::rate_limit_middleware;
pub use response::{ApiResponse, ApiResult, PageMeta};
pub use validate_tenant::{validate_tenant_middleware, ValidatedTenant};
