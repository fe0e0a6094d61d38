//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber from configuration
//! - Turn proxy events into log records
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, text format for development
//! - `RUST_LOG` wins over the configured level when set

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};
use crate::events::ProxyEvent;

/// Install the global subscriber. Does nothing when logging is disabled.
pub fn init_logging(
    config: &ObservabilityConfig,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    if !config.logging_enabled {
        return Ok(());
    }

    let level = config.log_level.to_ascii_lowercase();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},tower_http={level},hyper=warn")));

    let json = config.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .try_init()
}

/// Log every event published on the bus until it closes.
pub fn spawn_event_logger(mut events: broadcast::Receiver<ProxyEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub fn log_event(event: &ProxyEvent) {
    match event {
        ProxyEvent::RouteRegistered {
            route,
            host,
            path_prefix,
            target,
            replaced,
        } => tracing::debug!(%route, %host, %path_prefix, %target, replaced, "Route registered"),
        ProxyEvent::RouteUnregistered { route } => tracing::debug!(%route, "Route unregistered"),
        ProxyEvent::RequestCompleted {
            request_id,
            route,
            method,
            path,
            target,
            status,
            elapsed,
        } => tracing::info!(
            %request_id,
            %route,
            %method,
            %path,
            %target,
            status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request proxied"
        ),
        ProxyEvent::RequestFailed {
            request_id,
            route,
            method,
            path,
            kind,
            status,
            message,
            elapsed,
        } => {
            let route = route.map(|r| r.to_string()).unwrap_or_default();
            tracing::warn!(
                %request_id,
                %route,
                %method,
                %path,
                kind = kind.as_str(),
                status,
                error = %message,
                elapsed_ms = elapsed.as_millis() as u64,
                "Request failed"
            )
        }
        ProxyEvent::WebSocketOpened {
            request_id,
            route,
            target,
        } => tracing::info!(%request_id, %route, %target, "WebSocket session opened"),
        ProxyEvent::WebSocketClosed {
            request_id,
            route,
            client_to_upstream,
            upstream_to_client,
            error,
        } => match error {
            Some(error) => tracing::warn!(%request_id, %route, %error, "WebSocket session ended"),
            None => tracing::info!(
                %request_id,
                %route,
                client_to_upstream,
                upstream_to_client,
                "WebSocket session closed"
            ),
        },
        ProxyEvent::ConnectionError { peer, message } => {
            tracing::debug!(%peer, error = %message, "Connection error")
        }
        ProxyEvent::LifecycleChanged { state } => tracing::info!(%state, "Lifecycle state changed"),
    }
}
