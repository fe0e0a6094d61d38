//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) or built-in defaults
//!     → loader.rs (parse & deserialize)
//!     → env.rs (PROXY_PORT, BACKEND_HOST, ... overrides)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!
//! On reload (file change or SIGHUP):
//!     watcher.rs detects change
//!     → loader.rs loads + validates new config
//!     → lifecycle::startup applies the new route set
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Listener settings are read once; only routes change on reload

pub mod env;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load, load_config, ConfigError};
pub use schema::{
    AdminConfig, HealthCheckConfig, LogFormat, ObservabilityConfig, ProxyConfig, RouteConfig,
    ServiceConfig,
};
pub use watcher::ConfigWatcher;
