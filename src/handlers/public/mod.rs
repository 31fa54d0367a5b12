// handlers/public/mod.rs - handlers that need no bearer token
pub mod auth;
pub mod health;
