//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (tracking, drain phase, hyper HTTP/1.1 serving)
//!     → Hand off to HTTP layer
//!
//! Drain phases:
//!     Serving → Draining → Closing
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection and each upgraded relay is tracked for graceful shutdown
//! - Closing the listener never terminates accepted connections; the drain
//!   phase does

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionTracker, DrainPhase};
pub use listener::{Listener, ListenerSpec};
