//! Route matching logic.
//!
//! # Responsibilities
//! - Match host (exact, case-insensitive, port ignored) or wildcard
//! - Match path prefix on segment boundaries (case-sensitive)
//! - Pick the most specific candidate
//!
//! # Precedence
//! 1. Routes with an exact host pattern equal to the request host are
//!    consulted first; wildcard routes only when none of them covers the path.
//! 2. Within that tier the longest path prefix wins.
//! 3. Equal prefixes resolve to the most recent registration.

use std::sync::Arc;

use crate::routing::route::{normalize_host, Route};

/// Select the route for `(host, path)` from a table snapshot.
pub fn select(routes: &[Arc<Route>], host: &str, path: &str) -> Option<Arc<Route>> {
    let host = normalize_host(host);
    let path = if path.is_empty() { "/" } else { path };

    routes
        .iter()
        .filter(|r| r.host_pattern.matches(&host) && r.covers_path(path))
        .max_by_key(|r| rank(r))
        .cloned()
}

fn rank(route: &Route) -> (bool, usize, u64) {
    (
        route.host_pattern.is_exact(),
        route.path_prefix.len(),
        route.seq,
    )
}
