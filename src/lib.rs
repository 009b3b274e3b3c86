// Core modules
pub mod api;
pub mod auth;
pub mod config;
pub mod state;
pub mod types;

// Re-export key types and functions
pub use api::create_router;
pub use config::{AppConfig, ConfigError, resolve_config_path};
pub use state::AppState;
pub use types::{PkceVerifier, SessionToken, StateToken, Username};
