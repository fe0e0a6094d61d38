//! Read-only diagnostics surface.
//!
//! Served on its own listener, behind a bearer token:
//! - `GET /admin/status`: version, lifecycle state, listeners, connections
//! - `GET /admin/routes`: route table snapshot
//! - `GET /admin/services`: latest service probe results

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::health::ServiceHealth;
use crate::proxy::Proxy;

/// State shared by the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub proxy: Arc<Proxy>,
    pub services: Arc<ServiceHealth>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(get_routes))
        .route("/admin/services", get(get_services))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
