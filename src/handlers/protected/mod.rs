// handlers/protected/mod.rs - handlers behind bearer authentication
pub mod auth;
pub mod integrations;
pub mod organization;
