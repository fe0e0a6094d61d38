//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, errors, connections)
//! - Expose Prometheus-compatible metrics endpoint
//! - Derive metrics from proxy events
//!
//! # Metrics
//! - `proxy_requests_total` (counter): completed requests by route, status
//! - `proxy_request_errors_total` (counter): failed requests by kind, status
//! - `proxy_request_duration_seconds` (histogram): latency to response head
//! - `proxy_active_connections` (gauge): current connection count
//! - `proxy_websocket_sessions` (gauge): open upgraded sessions
//! - `proxy_websocket_bytes_total` (counter): relayed bytes by direction
//! - `proxy_service_health` (gauge): 1=healthy, 0=unhealthy
//! - `proxy_routes` (gauge): registered routes
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Labels for route, status code and error kind; never the request path

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::events::ProxyEvent;
use crate::net::ConnectionTracker;
use crate::routing::RouteTable;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_event(event: &ProxyEvent) {
    match event {
        ProxyEvent::RequestCompleted {
            route,
            status,
            elapsed,
            ..
        } => {
            counter!(
                "proxy_requests_total",
                "route" => route.to_string(),
                "status" => status.to_string()
            )
            .increment(1);
            histogram!("proxy_request_duration_seconds", "route" => route.to_string())
                .record(elapsed.as_secs_f64());
        }
        ProxyEvent::RequestFailed {
            route,
            kind,
            status,
            elapsed,
            ..
        } => {
            counter!(
                "proxy_request_errors_total",
                "kind" => kind.as_str(),
                "status" => status.to_string()
            )
            .increment(1);
            let route = route.map_or_else(|| "none".to_string(), |id| id.to_string());
            histogram!("proxy_request_duration_seconds", "route" => route)
                .record(elapsed.as_secs_f64());
        }
        ProxyEvent::WebSocketOpened { .. } => gauge!("proxy_websocket_sessions").increment(1.0),
        ProxyEvent::WebSocketClosed {
            client_to_upstream,
            upstream_to_client,
            ..
        } => {
            gauge!("proxy_websocket_sessions").decrement(1.0);
            counter!("proxy_websocket_bytes_total", "direction" => "client_to_upstream")
                .increment(*client_to_upstream);
            counter!("proxy_websocket_bytes_total", "direction" => "upstream_to_client")
                .increment(*upstream_to_client);
        }
        ProxyEvent::ConnectionError { .. } => counter!("proxy_connection_errors_total").increment(1),
        ProxyEvent::RouteRegistered { .. }
        | ProxyEvent::RouteUnregistered { .. }
        | ProxyEvent::LifecycleChanged { .. } => {}
    }
}

pub fn record_service_health(service: &str, healthy: bool) {
    gauge!("proxy_service_health", "service" => service.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

/// Feed every event on the bus into the recorder until the bus closes.
pub fn spawn_event_recorder(mut events: broadcast::Receiver<ProxyEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => record_event(&event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Periodically publish gauges that are sampled rather than event-driven.
pub fn spawn_gauge_sampler(
    tracker: ConnectionTracker,
    table: std::sync::Arc<RouteTable>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            gauge!("proxy_active_connections").set(tracker.active_count() as f64);
            gauge!("proxy_routes").set(table.len() as f64);
        }
    })
}
