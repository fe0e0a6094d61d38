//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Repeated SIGTERM/SIGINT are delivered again; the controller coalesces them
//! - SIGHUP triggers config reload, not shutdown

use std::io;

use crate::lifecycle::ShutdownReason;

/// What a received signal asks the process to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    Shutdown(ShutdownReason),
    Reload,
}

#[cfg(unix)]
pub struct SignalListener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next signal. `None` once the handlers are gone.
    pub async fn recv(&mut self) -> Option<ProcessSignal> {
        tokio::select! {
            s = self.interrupt.recv() => s.map(|_| ProcessSignal::Shutdown(ShutdownReason::Interrupt)),
            s = self.terminate.recv() => s.map(|_| ProcessSignal::Shutdown(ShutdownReason::Terminate)),
            s = self.hangup.recv() => s.map(|_| ProcessSignal::Reload),
        }
    }
}

#[cfg(not(unix))]
pub struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    pub fn install() -> io::Result<Self> {
        Ok(Self)
    }

    pub async fn recv(&mut self) -> Option<ProcessSignal> {
        tokio::signal::ctrl_c()
            .await
            .ok()
            .map(|_| ProcessSignal::Shutdown(ShutdownReason::Interrupt))
    }
}
