//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! accepted connection (net::connection)
//!     → server.rs (Axum router, request ID, tracing, optional rate limit)
//!     → routing::RouteTable::find
//!     → forwarder.rs (pooled upstream exchange)
//!         ├─ request.rs (URI / Host / X-Forwarded-* rewrite)
//!         ├─ response.rs (hop-by-hop strip, deadline-bounded body)
//!         └─ websocket.rs (upgrade replay + byte relay)
//!     → client
//! ```

pub mod forwarder;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use forwarder::{Forwarder, ForwarderConfig};
pub use request::{ClientContext, X_REQUEST_ID};
pub use server::{build_router, AppState};
