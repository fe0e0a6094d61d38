use std::net::SocketAddr;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::health::ServiceStatus;
use crate::lifecycle::LifecycleState;
use crate::routing::Route;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub state: LifecycleState,
    pub listeners: Vec<SocketAddr>,
    pub active_connections: u64,
    pub routes: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let diagnostics = state.proxy.diagnostics();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        state: diagnostics.lifecycle.state,
        listeners: diagnostics.lifecycle.listeners,
        active_connections: diagnostics.lifecycle.active_connections,
        routes: diagnostics.routes.len(),
    })
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<Route>> {
    Json(state.proxy.list())
}

pub async fn get_services(State(state): State<AdminState>) -> Json<Vec<ServiceStatus>> {
    Json(state.services.snapshot())
}
