//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Register routes → Start listeners
//!
//! Controller (controller.rs):
//!     Stopped → Starting → Running → Draining → Stopped
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown
//!     SIGHUP → config reload
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then routes, then listeners
//! - Ordered shutdown: stop accept, drain, force-close, stopped
//! - Shutdown has a grace period; remaining connections are dropped after it

use std::fmt;

use serde::Serialize;

pub mod controller;
pub mod signals;
pub mod startup;

pub use controller::{
    LifecycleController, LifecycleSettings, LifecycleSnapshot, ShutdownReason, ShutdownReport,
};
pub use signals::ProcessSignal;

/// State of the Lifecycle Controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Draining,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
