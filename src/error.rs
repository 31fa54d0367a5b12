// HTTP API Error Types
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::database::DatabaseError;
use crate::services::{
    AccountError, AuthzError, IntegrationError, RoleAdminError, SessionError, TenantError,
};

/// The eight error kinds every response can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    RateLimited,
    Internal,
    Unavailable,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn default_code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::Internal => "INTERNAL_ERROR",
            ErrorKind::Unavailable => "SERVICE_UNAVAILABLE",
        }
    }
}

/// HTTP API error with a stable machine-readable code and a client-safe message
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    code: &'static str,
    message: String,
    details: Option<Value>,
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.default_code(),
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    /// Override the default code of the kind.
    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = code;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind.status()
    }

    pub fn error_code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Convert to the `{success:false, error:{...}}` envelope
    pub fn to_json(&self) -> Value {
        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });
        if let Some(details) = &self.details {
            error["details"] = details.clone();
        }
        json!({ "success": false, "error": error })
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn too_many_requests(retry_after: u64) -> Self {
        let mut err = Self::new(ErrorKind::RateLimited, "Too many requests, retry later")
            .with_details(json!({ "retry_after": retry_after }));
        err.retry_after = Some(retry_after);
        err
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// Generic 500; the cause is logged, never returned.
    pub fn internal(context: &str, cause: impl std::fmt::Display) -> Self {
        tracing::error!(context, error = %cause, "Internal error");
        Self::internal_server_error("An error occurred while processing your request")
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(msg) => ApiError::not_found(msg),
            DatabaseError::Conflict(msg) => {
                tracing::warn!("Store conflict: {}", msg);
                ApiError::conflict("Resource already exists")
            }
            DatabaseError::Unavailable(msg) => {
                tracing::error!("Store unavailable: {}", msg);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            other => ApiError::internal("database", other),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        match err {
            SessionError::InvalidCredentials => ApiError::unauthorized(message).with_code("INVALID_CREDENTIALS"),
            SessionError::AccountDisabled => ApiError::forbidden(message).with_code("ACCOUNT_DISABLED"),
            SessionError::TokenExpired => ApiError::unauthorized(message).with_code("TOKEN_EXPIRED"),
            SessionError::TokenInvalid => ApiError::unauthorized(message).with_code("TOKEN_INVALID"),
            SessionError::SessionNotFound => ApiError::unauthorized(message).with_code("SESSION_NOT_FOUND"),
            SessionError::Credential(msg) => ApiError::internal("credentials", msg),
            SessionError::Store(e) => e.into(),
        }
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::PermissionDenied { resource, action } => ApiError::forbidden(format!(
                "Missing permission {}:{}",
                resource, action
            ))
            .with_code("PERMISSION_DENIED")
            .with_details(json!({ "resource": resource, "action": action })),
            AuthzError::InsufficientTenantRole { required, actual } => {
                ApiError::forbidden(format!("Requires organization role {}", required))
                    .with_code("INSUFFICIENT_ORGANIZATION_ROLE")
                    .with_details(json!({ "required": required, "actual": actual }))
            }
            // a failed lookup denies; the store error is logged, not returned
            AuthzError::Lookup(e) => match ApiError::from(e) {
                unavailable if unavailable.kind == ErrorKind::Unavailable => unavailable,
                _ => ApiError::forbidden("Permission could not be verified").with_code("PERMISSION_DENIED"),
            },
        }
    }
}

impl From<TenantError> for ApiError {
    fn from(err: TenantError) -> Self {
        let message = err.to_string();
        match err {
            TenantError::OrganizationRequired => ApiError::bad_request(message).with_code("ORGANIZATION_REQUIRED"),
            TenantError::InvalidIdentifier => ApiError::bad_request(message).with_code("INVALID_ORGANIZATION_ID"),
            TenantError::OrganizationNotFound => ApiError::not_found(message).with_code("ORGANIZATION_NOT_FOUND"),
            TenantError::NotAMember => ApiError::forbidden(message).with_code("NOT_A_MEMBER"),
            TenantError::NoDataStoreConfigured => {
                tracing::error!("Organization has no data store address");
                ApiError::service_unavailable(message).with_code("NO_DATA_STORE")
            }
            TenantError::InvalidStoreAddress => ApiError::bad_request(message).with_code("INVALID_STORE_ADDRESS"),
            TenantError::HasMembers(count) => ApiError::conflict(message)
                .with_code("ORGANIZATION_HAS_MEMBERS")
                .with_details(json!({ "members": count })),
            TenantError::Store(e) => e.into(),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        let message = err.to_string();
        match err {
            AccountError::RegistrationDisabled => ApiError::forbidden(message).with_code("REGISTRATION_DISABLED"),
            AccountError::InvalidInput(_) => ApiError::bad_request(message),
            AccountError::EmailTaken => ApiError::conflict(message).with_code("EMAIL_TAKEN"),
            AccountError::WrongPassword => ApiError::unauthorized(message).with_code("INVALID_CREDENTIALS"),
            AccountError::InvalidResetToken => ApiError::bad_request(message).with_code("INVALID_RESET_TOKEN"),
            AccountError::UserNotFound => ApiError::not_found(message).with_code("USER_NOT_FOUND"),
            AccountError::Credential(msg) => ApiError::internal("credentials", msg),
            AccountError::Session(e) => e.into(),
            AccountError::Store(e) => e.into(),
        }
    }
}

impl From<RoleAdminError> for ApiError {
    fn from(err: RoleAdminError) -> Self {
        let message = err.to_string();
        match err {
            RoleAdminError::RoleNotFound => ApiError::not_found(message).with_code("ROLE_NOT_FOUND"),
            RoleAdminError::DuplicateRole(_) => ApiError::conflict(message).with_code("ROLE_EXISTS"),
            RoleAdminError::SystemRole(_) => ApiError::conflict(message).with_code("SYSTEM_ROLE"),
            RoleAdminError::InvalidPermission(_) | RoleAdminError::InvalidSeed(_) => ApiError::bad_request(message),
            RoleAdminError::Store(e) => e.into(),
        }
    }
}

impl From<IntegrationError> for ApiError {
    fn from(err: IntegrationError) -> Self {
        let message = err.to_string();
        match err {
            IntegrationError::NotFound(_) => ApiError::not_found(message).with_code("INTEGRATION_NOT_FOUND"),
            IntegrationError::InvalidRequest(_) => ApiError::bad_request(message),
            IntegrationError::Upstream(_) | IntegrationError::Timeout(_) => {
                ApiError::service_unavailable(message).with_code("INTEGRATION_UNAVAILABLE")
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let mut response = (self.status_code(), Json(self.to_json())).into_response();
        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_code_and_details() {
        let body = ApiError::too_many_requests(42).to_json();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
        assert_eq!(body["error"]["details"]["retry_after"], 42);
    }

    #[test]
    fn rate_limited_sets_retry_after_header() {
        let response = ApiError::too_many_requests(7).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "7");
    }

    #[test]
    fn store_internals_are_not_leaked() {
        let err: ApiError = DatabaseError::QueryError("relation \"secret\" does not exist".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.message().contains("secret"));
    }

    #[test]
    fn conflict_hides_constraint_text() {
        let err: ApiError = DatabaseError::Conflict(
            "duplicate key value violates unique constraint \"users_email_key\"".to_string(),
        )
        .into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_code(), "CONFLICT");
        assert!(!err.message().contains("users_email_key"));
        assert!(!err.to_json().to_string().contains("constraint"));
    }

    #[test]
    fn session_errors_map_to_stable_codes() {
        let cases = [
            (SessionError::InvalidCredentials, StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            (SessionError::AccountDisabled, StatusCode::FORBIDDEN, "ACCOUNT_DISABLED"),
            (SessionError::TokenExpired, StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED"),
            (SessionError::SessionNotFound, StatusCode::UNAUTHORIZED, "SESSION_NOT_FOUND"),
        ];
        for (err, status, code) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status_code(), status);
            assert_eq!(api.error_code(), code);
        }
    }

    #[test]
    fn lookup_failure_is_a_denial() {
        let err: ApiError = AuthzError::Lookup(DatabaseError::QueryError("boom".to_string())).into();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }
}
