pub mod audit;
pub mod migrate;
pub mod org;
pub mod role;
pub mod sessions;
pub mod user;
