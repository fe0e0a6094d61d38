//! Route table and the registry operations that mutate it.
//!
//! Readers load the current snapshot with a single atomic pointer read and
//! never block. Writers serialize on a mutex, build a new `Vec` and publish it
//! with one atomic store, so a concurrent lookup sees either the old or the
//! new table, never a half-updated route.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;

use crate::error::{ProxyError, Result};
use crate::events::{EventBus, ProxyEvent};
use crate::routing::matcher;
use crate::routing::route::{normalize_prefix, HostPattern, Route, RouteId, RouteOptions, Target};

/// Immutable view of the table at one point in time.
pub type RouteSnapshot = Arc<Vec<Arc<Route>>>;

/// Ordered, atomically replaced collection of routes.
pub struct RouteTable {
    routes: ArcSwap<Vec<Arc<Route>>>,
    write_lock: Mutex<()>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
    events: EventBus,
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.routes.load().len())
            .finish()
    }
}

impl RouteTable {
    pub fn new(events: EventBus) -> Self {
        Self {
            routes: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
            events,
        }
    }

    /// Insert a route, or replace the one registered for the same host pattern
    /// and path prefix. A replaced route keeps its id.
    pub fn register(
        &self,
        host_pattern: &str,
        path_prefix: &str,
        target: &str,
        options: RouteOptions,
    ) -> Result<RouteId> {
        let host_pattern = HostPattern::parse(host_pattern)?;
        let path_prefix = normalize_prefix(path_prefix)?;
        let target = Target::parse(target)?;
        options.validate()?;

        let _guard = self.lock_writer();

        let current = self.routes.load_full();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let existing = current
            .iter()
            .position(|r| r.host_pattern == host_pattern && r.path_prefix == path_prefix);

        let id = match existing {
            Some(idx) => current[idx].id,
            None => RouteId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed)),
        };
        let route = Arc::new(Route {
            id,
            host_pattern,
            path_prefix,
            target,
            options,
            seq,
        });

        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        match existing {
            Some(idx) => next[idx] = Arc::clone(&route),
            None => next.push(Arc::clone(&route)),
        }
        self.routes.store(Arc::new(next));

        self.events.publish(ProxyEvent::RouteRegistered {
            route: id,
            host: route.host_pattern.to_string(),
            path_prefix: route.path_prefix.clone(),
            target: route.target.to_string(),
            replaced: existing.is_some(),
        });
        Ok(id)
    }

    /// Remove a route. Requests already matched to it are unaffected.
    pub fn unregister(&self, id: RouteId) -> Result<()> {
        let _guard = self.lock_writer();

        let current = self.routes.load_full();
        if !current.iter().any(|r| r.id == id) {
            return Err(ProxyError::RouteNotFound(id));
        }
        let next: Vec<Arc<Route>> = current.iter().filter(|r| r.id != id).cloned().collect();
        self.routes.store(Arc::new(next));

        self.events.publish(ProxyEvent::RouteUnregistered { route: id });
        Ok(())
    }

    // The lock guards no data, so a poisoned lock is still usable.
    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Routes in insertion order.
    pub fn list(&self) -> Vec<Route> {
        self.routes.load().iter().map(|r| Route::clone(r)).collect()
    }

    /// Current snapshot, shared rather than copied.
    pub fn snapshot(&self) -> RouteSnapshot {
        self.routes.load_full()
    }

    pub fn get(&self, id: RouteId) -> Option<Arc<Route>> {
        self.routes.load().iter().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Select the route for an inbound request against the current snapshot.
    pub fn find(&self, host: &str, path: &str) -> Result<Arc<Route>> {
        let snapshot = self.routes.load();
        matcher::select(&snapshot, host, path).ok_or_else(|| ProxyError::NoRouteMatched {
            host: host.to_string(),
            path: path.to_string(),
        })
    }
}
