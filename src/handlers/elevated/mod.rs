// handlers/elevated/mod.rs - platform administration
//
// Every handler checks a platform permission first; holders of the admin
// role pass every check.
pub mod audit;
pub mod organizations;
pub mod roles;
pub mod users;
