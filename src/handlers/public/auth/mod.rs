// handlers/public/auth/mod.rs - token acquisition and account recovery
pub mod login;
pub mod logout;
pub mod password_reset;
pub mod refresh;
pub mod register;

pub use login::login;
pub use logout::logout;
pub use password_reset::{password_reset_confirm, password_reset_request};
pub use refresh::refresh;
pub use register::register;
