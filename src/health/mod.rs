//! Service health subsystem.
//!
//! # Data Flow
//! ```text
//! Active probes (active.rs):
//!     Periodic timer
//!     → GET <health_check> on each enabled service
//!     → ServiceHealth store (DashMap)
//!     → admin /admin/services, proxy_service_health gauge
//! ```
//!
//! # Design Decisions
//! - Probes are informational: routing never consults them, since every
//!   route has exactly one upstream
//! - Health state is per service, replaced wholesale on config reload

pub mod active;

pub use active::{HealthMonitor, ServiceHealth, ServiceStatus};
