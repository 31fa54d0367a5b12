pub mod accounts;
pub mod audit;
pub mod authorization;
pub mod integrations;
pub mod rate_limiter;
pub mod roles;
pub mod session;
pub mod tenant_registry;
pub mod tenant_router;

pub use accounts::{AccountError, AccountService};
pub use audit::{AuditPage, AuditRecorder};
pub use authorization::{AuthorizationEngine, AuthzError, PermissionSet};
pub use integrations::{Integration, IntegrationError, IntegrationGateway, IntegrationRegistry};
pub use rate_limiter::{CounterStore, MemoryCounterStore, RateDecision, RateLimiter, RedisCounterStore};
pub use roles::{RoleAdmin, RoleAdminError, RoleSeed};
pub use session::{SessionError, SessionManager, TokenPair};
pub use tenant_registry::{TenantError, TenantRegistry};
pub use tenant_router::TenantRouter;

use uuid::Uuid;

use crate::database::models::{AuditOutcome, NewAuditLog};

/// Where a request came from, for audit entries.
#[derive(Debug, Clone, Default)]
pub struct RequestOrigin {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Who is performing an operation. CLI and background jobs act as `system()`.
#[derive(Debug, Clone, Default)]
pub struct Actor {
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub origin: RequestOrigin,
}

impl Actor {
    pub fn system() -> Self {
        Self::default()
    }

    pub fn user(user_id: Uuid, email: Option<String>, origin: RequestOrigin) -> Self {
        Self {
            user_id: Some(user_id),
            email,
            origin,
        }
    }

    /// Audit entry pre-filled with this actor and its origin.
    pub fn entry(&self, action: &str, resource: &str, outcome: AuditOutcome) -> NewAuditLog {
        NewAuditLog::new(action, resource, outcome)
            .actor(self.user_id, self.email.as_deref())
            .origin(self.origin.ip_address.clone(), self.origin.user_agent.clone())
    }
}
