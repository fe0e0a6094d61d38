//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (optional per-IP budget)
//!     → Pass to routing
//! Forwarded request / relayed response:
//!     → headers.rs (hop-by-hop stripping, Host policy, X-Forwarded-*)
//! ```

pub mod headers;
pub mod rate_limit;

pub use rate_limit::{RateLimitSettings, RateLimiter};
