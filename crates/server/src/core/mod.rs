//! Core Service Layer
//!
//! Provides shared infrastructure for the server: configuration,
//! authentication, request context, errors and the SQLite pool.

pub mod auth;
pub mod config;
pub mod ctx;
pub mod db;
pub mod error;
pub mod router;

// Re-exports for convenience
pub use config::{AppState, ServerConfig, MIN_HASH_COST};
pub use ctx::Ctx;
pub use error::{Error, Result};
pub use router::router;
