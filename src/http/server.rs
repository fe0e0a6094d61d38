//! HTTP application setup.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all proxy handler
//! - Wire up middleware (tracing, request ID, optional rate limit)
//! - Dispatch requests to the route table and the forwarder
//! - Turn per-request failures into responses and events

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware,
    response::{IntoResponse, Response},
    Router,
};
use tokio::time::Instant;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::events::{EventBus, ProxyEvent};
use crate::http::forwarder::Forwarder;
use crate::http::request::{self, ClientContext, MakeRequestUuid};
use crate::routing::RouteTable;
use crate::security::headers::InboundProto;
use crate::security::rate_limit::{rate_limit_middleware, RateLimiter};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub table: Arc<RouteTable>,
    pub forwarder: Arc<Forwarder>,
    pub events: EventBus,
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: AppState, rate_limiter: Option<Arc<RateLimiter>>) -> Router {
    let mut router = Router::new().fallback(proxy_handler).with_state(state);

    if let Some(limiter) = rate_limiter {
        router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
    }

    router
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Main proxy handler.
/// Looks up the route and forwards the request.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let started = Instant::now();
    let ctx = ClientContext {
        peer,
        proto: request
            .extensions()
            .get::<InboundProto>()
            .copied()
            .unwrap_or(InboundProto::Http),
        request_id: request::request_id(&request),
    };
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let host = request::request_host(&request).unwrap_or_default();

    let route = match state.table.find(&host, &path) {
        Ok(route) => route,
        Err(e) => return failure(&state.events, &ctx, &method, &path, e, started),
    };

    match state.forwarder.forward(Arc::clone(&route), request, &ctx).await {
        Ok(response) => {
            state.events.publish(ProxyEvent::RequestCompleted {
                request_id: ctx.request_id.clone(),
                route: route.id,
                method,
                path,
                target: route.target.to_string(),
                status: response.status().as_u16(),
                elapsed: started.elapsed(),
            });
            response
        }
        Err(e) => failure(&state.events, &ctx, &method, &path, e, started),
    }
}

fn failure(
    events: &EventBus,
    ctx: &ClientContext,
    method: &str,
    path: &str,
    error: crate::error::ProxyError,
    started: Instant,
) -> Response {
    events.publish(ProxyEvent::request_failed(
        &ctx.request_id,
        method,
        path,
        &error,
        started.elapsed(),
    ));
    error.into_response()
}
