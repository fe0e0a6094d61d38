//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registry API (register / unregister / list)
//!     → table.rs (validate, build new snapshot, atomic swap)
//!
//! Incoming request (host, path)
//!     → table.rs (load current snapshot)
//!     → matcher.rs (host tier, segment-aware longest prefix)
//!     → Return: Arc<Route> or NoRouteMatched
//! ```
//!
//! # Design Decisions
//! - Routes are immutable; updates publish a new snapshot
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same table and input always select the same route
//! - Explicit NoRouteMatched rather than a silent default

pub mod matcher;
pub mod route;
pub mod table;

pub use route::{HostPattern, Route, RouteId, RouteOptions, Target};
pub use table::{RouteSnapshot, RouteTable};
