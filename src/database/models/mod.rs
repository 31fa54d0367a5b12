pub mod audit;
pub mod organization;
pub mod organization_user;
pub mod password_reset;
pub mod role;
pub mod session;
pub mod user;

pub use audit::{AuditFilter, AuditLog, AuditOutcome, AuditStats, CountBucket, NewAuditLog, TimeRange};
pub use organization::{NewOrganization, Organization, OrganizationUpdate, TenantRole, UserOrganization};
pub use organization_user::{NewOrganizationUser, OrganizationUser};
pub use password_reset::{NewPasswordResetToken, PasswordResetToken};
pub use role::{NewRole, Permission, PermissionKey, Role, RoleGrant, RoleWithPermissions};
pub use session::{NewSession, Session, SessionRotation};
pub use user::{NewUser, User};
