//! Diagnostics events published by the proxy core.
//!
//! The core does not log. It publishes what happened on a broadcast channel and
//! lets subscribers (logging, metrics, tests) decide what to do with it.
//! Publishing never blocks; slow subscribers observe `Lagged` and skip ahead.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::error::{ErrorKind, ProxyError};
use crate::lifecycle::LifecycleState;
use crate::routing::RouteId;

#[derive(Debug, Clone)]
pub enum ProxyEvent {
    RouteRegistered {
        route: RouteId,
        host: String,
        path_prefix: String,
        target: String,
        replaced: bool,
    },
    RouteUnregistered {
        route: RouteId,
    },
    /// Response head relayed to the client.
    RequestCompleted {
        request_id: String,
        route: RouteId,
        method: String,
        path: String,
        target: String,
        status: u16,
        elapsed: Duration,
    },
    RequestFailed {
        request_id: String,
        route: Option<RouteId>,
        method: String,
        path: String,
        kind: ErrorKind,
        status: u16,
        message: String,
        elapsed: Duration,
    },
    WebSocketOpened {
        request_id: String,
        route: RouteId,
        target: String,
    },
    WebSocketClosed {
        request_id: String,
        route: RouteId,
        client_to_upstream: u64,
        upstream_to_client: u64,
        error: Option<String>,
    },
    ConnectionError {
        peer: SocketAddr,
        message: String,
    },
    LifecycleChanged {
        state: LifecycleState,
    },
}

impl ProxyEvent {
    pub(crate) fn request_failed(
        request_id: &str,
        method: &str,
        path: &str,
        error: &ProxyError,
        elapsed: Duration,
    ) -> Self {
        ProxyEvent::RequestFailed {
            request_id: request_id.to_string(),
            route: error.route(),
            method: method.to_string(),
            path: path.to_string(),
            kind: error.kind(),
            status: error.status().as_u16(),
            message: error.to_string(),
            elapsed,
        }
    }
}

/// Cloneable handle on the event channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProxyEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.tx.subscribe()
    }

    /// Fire and forget; an event with no subscribers is dropped.
    pub fn publish(&self, event: ProxyEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(ProxyEvent::RouteUnregistered {
            route: RouteId::from_raw(7),
        });
        match rx.recv().await.unwrap() {
            ProxyEvent::RouteUnregistered { route } => assert_eq!(route.as_u64(), 7),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let bus = EventBus::new(1);
        bus.publish(ProxyEvent::RouteUnregistered {
            route: RouteId::from_raw(1),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
