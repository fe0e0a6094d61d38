//! The proxy core as one handle.
//!
//! # Responsibilities
//! - Wire the route table, forwarder, router and lifecycle controller together
//! - Expose the Registry API (`register`, `unregister`, `list`)
//! - Expose lifecycle control and the diagnostics snapshot
//!
//! # Data Flow
//! ```text
//! Registry API ──→ RouteTable (atomic snapshot)
//!                       ↑ find
//! Listener → connection → Router → proxy handler → Forwarder → upstream
//!                                        │
//!                                        └──→ EventBus → subscribers
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::events::{EventBus, ProxyEvent};
use crate::http::{build_router, AppState, Forwarder, ForwarderConfig};
use crate::lifecycle::{
    LifecycleController, LifecycleSettings, LifecycleSnapshot, LifecycleState, ShutdownReason,
    ShutdownReport,
};
use crate::net::{ConnectionTracker, ListenerSpec};
use crate::routing::{Route, RouteId, RouteOptions, RouteTable};
use crate::security::{RateLimitSettings, RateLimiter};

/// Construction-time settings for [`Proxy`].
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub forwarder: ForwarderConfig,
    pub lifecycle: LifecycleSettings,
    /// Per-client limit; `None` disables rate limiting.
    pub rate_limit: Option<RateLimitSettings>,
    /// Buffered events per subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            forwarder: ForwarderConfig::default(),
            lifecycle: LifecycleSettings::default(),
            rate_limit: None,
            event_capacity: 1024,
        }
    }
}

/// Route table and lifecycle state at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub lifecycle: LifecycleSnapshot,
    pub routes: Vec<Route>,
}

pub struct Proxy {
    table: Arc<RouteTable>,
    controller: LifecycleController,
    events: EventBus,
}

impl Proxy {
    pub fn new(options: ProxyOptions) -> Self {
        let events = EventBus::new(options.event_capacity);
        let table = Arc::new(RouteTable::new(events.clone()));
        let tracker = ConnectionTracker::new();
        let forwarder = Arc::new(Forwarder::new(
            options.forwarder,
            tracker.clone(),
            events.clone(),
        ));
        let rate_limiter = options
            .rate_limit
            .map(|settings| Arc::new(RateLimiter::new(settings)));

        let app = build_router(
            AppState {
                table: Arc::clone(&table),
                forwarder,
                events: events.clone(),
            },
            rate_limiter,
        );
        let controller =
            LifecycleController::new(app, tracker, events.clone(), options.lifecycle);

        Self {
            table,
            controller,
            events,
        }
    }

    pub fn register(
        &self,
        host_pattern: &str,
        path_prefix: &str,
        target: &str,
        options: RouteOptions,
    ) -> Result<RouteId> {
        self.table.register(host_pattern, path_prefix, target, options)
    }

    pub fn unregister(&self, id: RouteId) -> Result<()> {
        self.table.unregister(id)
    }

    pub fn list(&self) -> Vec<Route> {
        self.table.list()
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.table
    }

    pub async fn start(&self, listeners: Vec<ListenerSpec>) -> Result<Vec<SocketAddr>> {
        self.controller.start(listeners).await
    }

    pub async fn shutdown(&self, reason: ShutdownReason) -> ShutdownReport {
        self.controller.shutdown(reason).await
    }

    pub fn state(&self) -> LifecycleState {
        self.controller.state()
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            lifecycle: self.controller.snapshot(),
            routes: self.table.list(),
        }
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("routes", &self.table.len())
            .field("state", &self.controller.state())
            .finish()
    }
}
