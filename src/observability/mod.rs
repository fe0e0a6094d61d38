//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Proxy core publishes ProxyEvent on the EventBus
//!     → logging.rs (structured tracing records)
//!     → metrics.rs (counters, gauges, histograms → Prometheus scrape)
//!
//! HTTP layer:
//!     → tower-http TraceLayer spans, x-request-id correlation
//! ```
//!
//! # Design Decisions
//! - The core never logs; subscribers here decide what an event becomes
//! - Structured logging (JSON) for machine parsing, text for development
//! - Request ID flows from the router through events to log records
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
