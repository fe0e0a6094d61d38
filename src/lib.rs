//! Path-based HTTP/WebSocket reverse proxy.
//!
//! Routes map a virtual host and path prefix to a single upstream. Requests
//! are matched most-specific-prefix-first and streamed to the upstream over
//! pooled HTTP/1.1 connections; WebSocket upgrades are relayed byte for byte.
//!
//! ```text
//! Registry API ──→ routing (atomic snapshot)
//!                        ↑
//! net (listeners, drain) → http (router, forwarder, websocket) → upstream
//!        ↑                         │
//!   lifecycle                   events ──→ observability
//! ```

// Core
pub mod error;
pub mod events;
pub mod http;
pub mod net;
pub mod proxy;
pub mod routing;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod security;

// Outer surfaces
pub mod admin;
pub mod health;

pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use events::{EventBus, ProxyEvent};
pub use lifecycle::{LifecycleState, ShutdownReason, ShutdownReport};
pub use net::ListenerSpec;
pub use proxy::{Diagnostics, Proxy, ProxyOptions};
pub use routing::{Route, RouteId, RouteOptions};
