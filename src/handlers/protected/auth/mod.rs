// handlers/protected/auth/mod.rs - the caller's own session and account
pub mod password;
pub mod session;

pub use password::change_password;
pub use session::{logout_all, whoami};
