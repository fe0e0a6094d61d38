//! Lifecycle Controller.
//!
//! # Responsibilities
//! - Own the listening sockets and their accept loops
//! - Hand every accepted socket to a connection task
//! - Drain in-flight connections on shutdown, force-close after the grace period
//!
//! # Design Decisions
//! - State lives in a `watch` channel so concurrent shutdown calls coalesce
//!   onto the sequence already running and wait for its `Stopped`
//! - Accept loops stop (and drop their sockets) before draining begins
//! - Connections are counted from accept, TLS handshake included

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::Router;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{ProxyError, Result};
use crate::events::{EventBus, ProxyEvent};
use crate::lifecycle::LifecycleState;
use crate::net::connection::{self, ConnectionTracker, DrainPhase};
use crate::net::{Listener, ListenerSpec};
use crate::security::headers::InboundProto;

/// Time given to connection tasks to unwind after force-close.
const FORCE_CLOSE_SETTLE: Duration = Duration::from_secs(1);

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Concurrent connections per listener.
    pub max_connections: usize,
    /// How long in-flight requests may run once shutdown starts.
    pub grace_period: Duration,
    pub tls_handshake_timeout: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            grace_period: Duration::from_secs(10),
            tls_handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// What asked for the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => f.write_str("SIGINT"),
            ShutdownReason::Terminate => f.write_str("SIGTERM"),
            ShutdownReason::Requested => f.write_str("requested"),
        }
    }
}

/// Outcome of a shutdown call.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub reason: ShutdownReason,
    /// False when the call joined a sequence already in progress, or the
    /// proxy was not running.
    pub initiated: bool,
    /// Connections still open when the grace period ran out.
    pub forced_connections: u64,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn drained(&self) -> bool {
        self.forced_connections == 0
    }

    fn idle(reason: ShutdownReason) -> Self {
        Self {
            reason,
            initiated: false,
            forced_connections: 0,
            elapsed: Duration::ZERO,
        }
    }
}

/// Read-only view for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleSnapshot {
    pub state: LifecycleState,
    pub listeners: Vec<SocketAddr>,
    pub active_connections: u64,
}

pub struct LifecycleController {
    app: Router,
    tracker: ConnectionTracker,
    events: EventBus,
    settings: LifecycleSettings,
    state: watch::Sender<LifecycleState>,
    stop_accepting: watch::Sender<bool>,
    accept_tasks: Mutex<Vec<JoinHandle<()>>>,
    addresses: Mutex<Vec<SocketAddr>>,
    last_report: Mutex<Option<ShutdownReport>>,
}

impl LifecycleController {
    pub fn new(
        app: Router,
        tracker: ConnectionTracker,
        events: EventBus,
        settings: LifecycleSettings,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Stopped);
        let (stop_accepting, _) = watch::channel(false);
        Self {
            app,
            tracker,
            events,
            settings,
            state,
            stop_accepting,
            accept_tasks: Mutex::new(Vec::new()),
            addresses: Mutex::new(Vec::new()),
            last_report: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        LifecycleSnapshot {
            state: self.state(),
            listeners: lock(&self.addresses).clone(),
            active_connections: self.tracker.active_count(),
        }
    }

    /// Bind every listener, then begin accepting.
    ///
    /// All listeners bind before any accepts; if one fails the others are
    /// released and the controller returns to `Stopped`.
    pub async fn start(&self, listeners: Vec<ListenerSpec>) -> Result<Vec<SocketAddr>> {
        let mut current = LifecycleState::Stopped;
        let claimed = self.state.send_if_modified(|state| {
            current = *state;
            if *state == LifecycleState::Stopped {
                *state = LifecycleState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ProxyError::AlreadyStarted(current));
        }
        self.announce(LifecycleState::Starting);

        let mut bound = Vec::with_capacity(listeners.len());
        let mut addresses = Vec::with_capacity(listeners.len());
        for spec in &listeners {
            let listener = match Listener::bind(spec, self.settings.max_connections).await {
                Ok(listener) => listener,
                Err(e) => {
                    self.set_state(LifecycleState::Stopped);
                    return Err(e);
                }
            };
            match listener.local_addr() {
                Ok(addr) => addresses.push(addr),
                Err(source) => {
                    self.set_state(LifecycleState::Stopped);
                    return Err(ProxyError::Bind {
                        addr: spec.addr,
                        source,
                    });
                }
            }
            bound.push(listener);
        }

        self.tracker.set_phase(DrainPhase::Serving);
        self.stop_accepting.send_replace(false);

        let tasks = bound
            .into_iter()
            .map(|listener| {
                let accept = AcceptLoop {
                    listener,
                    app: self.app.clone(),
                    tracker: self.tracker.clone(),
                    events: self.events.clone(),
                    stop: self.stop_accepting.subscribe(),
                    handshake_timeout: self.settings.tls_handshake_timeout,
                };
                tokio::spawn(accept.run())
            })
            .collect();

        *lock(&self.accept_tasks) = tasks;
        *lock(&self.addresses) = addresses.clone();
        self.set_state(LifecycleState::Running);
        Ok(addresses)
    }

    /// Stop accepting, drain, force-close after the grace period.
    ///
    /// Only one sequence runs at a time; a call made while one is in progress
    /// waits for it and returns its report with `initiated = false`.
    pub async fn shutdown(&self, reason: ShutdownReason) -> ShutdownReport {
        let mut rx = self.state.subscribe();
        loop {
            let claimed = self.state.send_if_modified(|state| {
                if *state == LifecycleState::Running {
                    *state = LifecycleState::Draining;
                    true
                } else {
                    false
                }
            });
            if claimed {
                break;
            }

            let current = *rx.borrow_and_update();
            match current {
                LifecycleState::Running => continue,
                LifecycleState::Stopped => {
                    return match lock(&self.last_report).clone() {
                        Some(report) => ShutdownReport {
                            reason,
                            initiated: false,
                            ..report
                        },
                        None => ShutdownReport::idle(reason),
                    };
                }
                LifecycleState::Starting | LifecycleState::Draining => {
                    if rx.changed().await.is_err() {
                        return ShutdownReport::idle(reason);
                    }
                }
            }
        }

        self.announce(LifecycleState::Draining);
        let started = Instant::now();

        self.stop_accepting.send_replace(true);
        let tasks = std::mem::take(&mut *lock(&self.accept_tasks));
        for task in tasks {
            let _ = task.await;
        }
        lock(&self.addresses).clear();

        self.tracker.set_phase(DrainPhase::Draining);
        let drained = tokio::time::timeout(self.settings.grace_period, self.tracker.wait_idle())
            .await
            .is_ok();

        let mut forced_connections = 0;
        if !drained {
            forced_connections = self.tracker.active_count();
            self.tracker.set_phase(DrainPhase::Closing);
            let _ = tokio::time::timeout(FORCE_CLOSE_SETTLE, self.tracker.wait_idle()).await;
        }

        let report = ShutdownReport {
            reason,
            initiated: true,
            forced_connections,
            elapsed: started.elapsed(),
        };
        *lock(&self.last_report) = Some(report.clone());
        self.set_state(LifecycleState::Stopped);
        report
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.send_replace(state);
        self.announce(state);
    }

    fn announce(&self, state: LifecycleState) {
        self.events.publish(ProxyEvent::LifecycleChanged { state });
    }
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct AcceptLoop {
    listener: Listener,
    app: Router,
    tracker: ConnectionTracker,
    events: EventBus,
    stop: watch::Receiver<bool>,
    handshake_timeout: Duration,
}

impl AcceptLoop {
    async fn run(mut self) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = stopped(&mut self.stop) => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer, permit)) => {
                    let guard = self.tracker.track();
                    let phase = self.tracker.subscribe();
                    let app = self.app.clone();
                    let events = self.events.clone();
                    let tls = self.listener.tls_acceptor().cloned();
                    let handshake_timeout = self.handshake_timeout;

                    tokio::spawn(async move {
                        let _permit = permit;
                        let Some(acceptor) = tls else {
                            connection::serve(stream, peer, InboundProto::Http, app, guard, phase, events)
                                .await;
                            return;
                        };

                        let handshake = tokio::time::timeout(handshake_timeout, acceptor.accept(stream));
                        let outcome = tokio::select! {
                            outcome = handshake => outcome,
                            _ = connection::closing(phase.clone()) => return,
                        };
                        match outcome {
                            Ok(Ok(tls_stream)) => {
                                connection::serve(
                                    tls_stream,
                                    peer,
                                    InboundProto::Https,
                                    app,
                                    guard,
                                    phase,
                                    events,
                                )
                                .await
                            }
                            Ok(Err(e)) => events.publish(ProxyEvent::ConnectionError {
                                peer,
                                message: format!("TLS handshake failed: {e}"),
                            }),
                            Err(_) => events.publish(ProxyEvent::ConnectionError {
                                peer,
                                message: "TLS handshake timed out".to_string(),
                            }),
                        }
                    });
                }
                Err(e) => {
                    if let Ok(local) = self.listener.local_addr() {
                        self.events.publish(ProxyEvent::ConnectionError {
                            peer: local,
                            message: format!("accept failed: {e}"),
                        });
                    }
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }
}

async fn stopped(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use std::sync::Arc;

    fn controller(grace: Duration) -> LifecycleController {
        let app = Router::new().route("/", get(|| async { "ok" }));
        LifecycleController::new(
            app,
            ConnectionTracker::new(),
            EventBus::new(64),
            LifecycleSettings {
                max_connections: 16,
                grace_period: grace,
                tls_handshake_timeout: Duration::from_secs(1),
            },
        )
    }

    fn loopback() -> ListenerSpec {
        ListenerSpec::plain("127.0.0.1:0".parse().unwrap())
    }

    #[tokio::test]
    async fn start_then_stop() {
        let controller = controller(Duration::from_secs(1));
        let addrs = controller.start(vec![loopback()]).await.unwrap();
        assert_eq!(controller.state(), LifecycleState::Running);
        assert_ne!(addrs[0].port(), 0);
        assert_eq!(controller.snapshot().listeners, addrs);

        let err = controller.start(vec![loopback()]).await.unwrap_err();
        assert!(matches!(err, ProxyError::AlreadyStarted(LifecycleState::Running)));

        let report = controller.shutdown(ShutdownReason::Requested).await;
        assert!(report.initiated);
        assert!(report.drained());
        assert_eq!(controller.state(), LifecycleState::Stopped);

        assert!(tokio::net::TcpStream::connect(addrs[0]).await.is_err());
    }

    #[tokio::test]
    async fn bind_failure_returns_to_stopped() {
        let holder = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = holder.local_addr().unwrap();

        let controller = controller(Duration::from_secs(1));
        let err = controller
            .start(vec![loopback(), ListenerSpec::plain(taken)])
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Bind { addr, .. } if addr == taken));
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn shutdown_when_stopped_is_a_no_op() {
        let controller = controller(Duration::from_secs(1));
        let report = controller.shutdown(ShutdownReason::Interrupt).await;
        assert!(!report.initiated);
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn concurrent_shutdowns_coalesce() {
        let controller = Arc::new(controller(Duration::from_millis(200)));
        controller.start(vec![loopback()]).await.unwrap();

        // Keep one connection open so the sequence lasts the full grace period.
        let guard = controller.tracker().track();

        let first = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.shutdown(ShutdownReason::Terminate).await }
        });
        let second = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                controller.shutdown(ShutdownReason::Interrupt).await
            }
        });

        let (first, second) = (first.await.unwrap(), second.await.unwrap());
        assert!(first.initiated ^ second.initiated);
        assert_eq!(first.forced_connections, 1);
        assert_eq!(second.forced_connections, 1);
        assert_eq!(controller.state(), LifecycleState::Stopped);
        drop(guard);
    }

    #[tokio::test]
    async fn grace_period_expiry_forces_close() {
        let controller = controller(Duration::from_millis(50));
        controller.start(vec![loopback()]).await.unwrap();
        let _guard = controller.tracker().track();

        let report = controller.shutdown(ShutdownReason::Requested).await;
        assert_eq!(report.forced_connections, 1);
        assert_eq!(controller.tracker().phase(), DrainPhase::Closing);
    }

    #[tokio::test]
    async fn can_restart_after_stop() {
        let controller = controller(Duration::from_secs(1));
        controller.start(vec![loopback()]).await.unwrap();
        controller.shutdown(ShutdownReason::Requested).await;

        controller.start(vec![loopback()]).await.unwrap();
        assert_eq!(controller.state(), LifecycleState::Running);
        assert_eq!(controller.tracker().phase(), DrainPhase::Serving);
        controller.shutdown(ShutdownReason::Requested).await;
    }
}
