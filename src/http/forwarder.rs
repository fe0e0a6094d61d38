//! Forwarding of matched requests to their upstream.
//!
//! # Data Flow
//! ```text
//! matched Arc<Route> + inbound request
//!     → request.rs (URI / Host / X-Forwarded-* rewrite)
//!     → pooled hyper client (connect + response head under timeout_ms)
//!     → response.rs (strip hop-by-hop, stream body under proxy_timeout_ms)
//!
//! Upgrade requests branch to websocket.rs after the route check.
//! ```
//!
//! # Design Decisions
//! - No retries: every failure surfaces once as 502/504 (or an aborted stream)
//! - Upstream connections pooled per scheme+authority by the hyper client;
//!   connections found closed on checkout are discarded by the pool
//! - Request bodies are streamed, never buffered

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tokio::time::Instant;

use crate::error::{ProxyError, Result, TimeoutStage};
use crate::events::EventBus;
use crate::http::request::{self, ClientContext};
use crate::http::{response, websocket};
use crate::net::ConnectionTracker;
use crate::routing::Route;

/// Settings shared by every forwarded exchange.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Add X-Forwarded-* headers.
    pub xfwd: bool,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            xfwd: false,
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
        }
    }
}

pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    config: ForwarderConfig,
    tracker: ConnectionTracker,
    events: EventBus,
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("config", &self.config)
            .finish()
    }
}

impl Forwarder {
    pub fn new(config: ForwarderConfig, tracker: ConnectionTracker, events: EventBus) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build(connector);

        Self {
            client,
            config,
            tracker,
            events,
        }
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    pub(crate) fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    /// Forward one inbound request through `route`.
    pub async fn forward(
        &self,
        route: Arc<Route>,
        request: Request<Body>,
        ctx: &ClientContext,
    ) -> Result<Response<Body>> {
        if websocket::is_upgrade_request(request.headers()) {
            return websocket::forward(self, route, request, ctx).await;
        }

        let started = Instant::now();
        let upstream = request::upstream_request(&route, request, ctx, self.config.xfwd, false)?;
        let response = self.send(&route, upstream).await?;
        Ok(response::relay(
            response,
            &route,
            started + route.options.proxy_timeout(),
        ))
    }

    /// Send a prepared request and wait for the response head within the
    /// route's `timeout_ms`.
    pub(crate) async fn send(
        &self,
        route: &Route,
        upstream: Request<Body>,
    ) -> Result<Response<Incoming>> {
        match tokio::time::timeout(route.options.timeout(), self.client.request(upstream)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(source)) => Err(ProxyError::UpstreamUnreachable {
                route: route.id,
                target: route.target.to_string(),
                source: Box::new(source),
            }),
            Err(_) => Err(ProxyError::UpstreamTimeout {
                route: route.id,
                target: route.target.to_string(),
                stage: TimeoutStage::Connect,
            }),
        }
    }
}
