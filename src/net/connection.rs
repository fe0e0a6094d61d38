//! Connection lifecycle tracking and per-connection serving.
//!
//! # Responsibilities
//! - Count live connections (HTTP connections and upgraded relays)
//! - Broadcast the drain phase to every connection task
//! - Serve one accepted socket with hyper, reacting to drain / force-close

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ConnectInfo;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tower::ServiceExt;

use crate::events::{EventBus, ProxyEvent};
use crate::security::headers::InboundProto;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Phase every live connection observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPhase {
    /// Normal operation.
    Serving,
    /// Finish in-flight requests, then close. Upgraded sessions keep running.
    Draining,
    /// Close everything now.
    Closing,
}

/// Tracks live connections for graceful shutdown.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<u64>>,
    phase: Arc<watch::Sender<DrainPhase>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        let (phase, _) = watch::channel(DrainPhase::Serving);
        Self {
            active: Arc::new(active),
            phase: Arc::new(phase),
        }
    }

    /// Record a new live connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active.send_modify(|n| *n += 1);
        ConnectionGuard {
            active: Arc::clone(&self.active),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        *self.active.borrow()
    }

    pub fn phase(&self) -> DrainPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DrainPhase> {
        self.phase.subscribe()
    }

    pub fn set_phase(&self, phase: DrainPhase) {
        self.phase.send_replace(phase);
    }

    /// Resolves once no connection is live.
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves when the tracker enters [`DrainPhase::Closing`].
pub async fn closing(mut phase: watch::Receiver<DrainPhase>) {
    let _ = phase.wait_for(|p| *p == DrainPhase::Closing).await;
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<u64>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Serve HTTP/1.1 (with upgrades) on one accepted socket.
///
/// Entering `Draining` asks hyper to finish the in-flight exchange and close;
/// `Closing` drops the connection immediately.
pub async fn serve<I>(
    io: I,
    peer: SocketAddr,
    proto: InboundProto,
    app: axum::Router,
    guard: ConnectionGuard,
    mut phase: watch::Receiver<DrainPhase>,
    events: EventBus,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |mut req: Request<Incoming>| {
        req.extensions_mut().insert(ConnectInfo(peer));
        req.extensions_mut().insert(proto);
        app.clone().oneshot(req)
    });

    let conn = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades();
    tokio::pin!(conn);

    match *phase.borrow_and_update() {
        DrainPhase::Serving => {}
        DrainPhase::Draining => conn.as_mut().graceful_shutdown(),
        DrainPhase::Closing => return,
    }

    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    if !e.is_incomplete_message() {
                        events.publish(ProxyEvent::ConnectionError {
                            peer,
                            message: format!("{}: {}", guard.id(), error_chain(&e)),
                        });
                    }
                }
                break;
            }
            changed = phase.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *phase.borrow_and_update();
                match current {
                    DrainPhase::Serving => {}
                    DrainPhase::Draining => conn.as_mut().graceful_shutdown(),
                    DrainPhase::Closing => break,
                }
            }
        }
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
