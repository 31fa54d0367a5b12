pub mod manager;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod query_builder;
pub mod repository;

pub use manager::{DatabaseError, DatabaseManager, PoolSettings, TenantConnection};
pub use memory::MemoryStore;
pub use postgres::{PgStore, PgTenantDirectory};
pub use query_builder::{qualified_query, TenantNamespace, TenantQuery, TenantScope};
pub use repository::{
    AuditDimension, AuditRepository, CredentialStore, OrganizationRepository, OrganizationUserRepository,
    PasswordResetRepository, RoleRepository, SessionRepository, StoreHealth, UserRepository,
};
