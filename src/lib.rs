pub mod actions;
pub mod auth;
pub mod config;
#[cfg(feature = "postgres-store")]
pub mod db;
pub mod error;
pub mod models;
pub mod openapi;
pub mod populate;
pub mod rate_limit; // in-memory rate limiting
pub mod repo;
pub mod revalidate; // route cache + purge providers
pub mod routes;
pub mod validation;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
