// handlers/protected/organization/mod.rs - tenant-scoped handlers
//
// Every route here runs behind jwt_auth_middleware and
// validate_tenant_middleware, so a ValidatedTenant is always present.
pub mod members;
pub mod show;
pub mod users;

pub use members::{members_add, members_remove};
pub use show::show;
pub use users::{users_create, users_delete, users_list, users_show};
