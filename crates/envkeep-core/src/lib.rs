//! envkeep Core - Shared functionality for the envkeep store and tools
//!
//! Secret configuration per namespace and environment, encrypted at rest.

pub mod config;
pub mod format;
pub mod paths;

pub use config::Settings;
pub use paths::Paths;
