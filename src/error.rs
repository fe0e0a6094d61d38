//! Error taxonomy for the proxy core.
//!
//! Registration errors are returned synchronously to the caller. Per-connection
//! errors are turned into a client-visible response (or an aborted stream) and
//! published as an event; they never escape the connection task. Only
//! [`ProxyError::Bind`] is fatal to the process.

use std::fmt;
use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::lifecycle::LifecycleState;
use crate::routing::RouteId;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ProxyError> = std::result::Result<T, E>;

/// Which deadline expired while talking to an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutStage {
    /// Connecting and waiting for the response head (`timeout_ms`).
    Connect,
    /// Completing the whole exchange (`proxy_timeout_ms`).
    Exchange,
}

impl fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutStage::Connect => f.write_str("connect"),
            TimeoutStage::Exchange => f.write_str("exchange"),
        }
    }
}

/// Error kinds without payload, cheap to copy into events and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRoute,
    RouteNotFound,
    NoRouteMatched,
    UpstreamUnreachable,
    UpstreamTimeout,
    ProtocolViolation,
    Bind,
    Tls,
    AlreadyStarted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRoute => "invalid_route",
            ErrorKind::RouteNotFound => "route_not_found",
            ErrorKind::NoRouteMatched => "no_route_matched",
            ErrorKind::UpstreamUnreachable => "upstream_unreachable",
            ErrorKind::UpstreamTimeout => "upstream_timeout",
            ErrorKind::ProtocolViolation => "protocol_violation",
            ErrorKind::Bind => "bind",
            ErrorKind::Tls => "tls",
            ErrorKind::AlreadyStarted => "already_started",
        }
    }
}

/// Every failure the proxy core can report.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid route: {reason}")]
    InvalidRoute { reason: String },

    #[error("route {0} not found")]
    RouteNotFound(RouteId),

    #[error("no route matched host '{host}' path '{path}'")]
    NoRouteMatched { host: String, path: String },

    #[error("upstream {target} unreachable (route {route}): {source}")]
    UpstreamUnreachable {
        route: RouteId,
        target: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("upstream {target} timed out during {stage} (route {route})")]
    UpstreamTimeout {
        route: RouteId,
        target: String,
        stage: TimeoutStage,
    },

    #[error("protocol violation on route {route}: {reason}")]
    ProtocolViolation { route: RouteId, reason: String },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS setup failed: {source}")]
    Tls {
        #[source]
        source: std::io::Error,
    },

    #[error("cannot start: proxy is {0}")]
    AlreadyStarted(LifecycleState),
}

impl ProxyError {
    pub(crate) fn invalid_route(reason: impl Into<String>) -> Self {
        ProxyError::InvalidRoute {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProxyError::InvalidRoute { .. } => ErrorKind::InvalidRoute,
            ProxyError::RouteNotFound(_) => ErrorKind::RouteNotFound,
            ProxyError::NoRouteMatched { .. } => ErrorKind::NoRouteMatched,
            ProxyError::UpstreamUnreachable { .. } => ErrorKind::UpstreamUnreachable,
            ProxyError::UpstreamTimeout { .. } => ErrorKind::UpstreamTimeout,
            ProxyError::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
            ProxyError::Bind { .. } => ErrorKind::Bind,
            ProxyError::Tls { .. } => ErrorKind::Tls,
            ProxyError::AlreadyStarted(_) => ErrorKind::AlreadyStarted,
        }
    }

    /// Route the error is attributed to, when there is one.
    pub fn route(&self) -> Option<RouteId> {
        match self {
            ProxyError::RouteNotFound(id) => Some(*id),
            ProxyError::UpstreamUnreachable { route, .. }
            | ProxyError::UpstreamTimeout { route, .. }
            | ProxyError::ProtocolViolation { route, .. } => Some(*route),
            _ => None,
        }
    }

    /// Status code reported to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoRouteMatched { .. } | ProxyError::UpstreamUnreachable { .. } => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::ProtocolViolation { .. } | ProxyError::InvalidRoute { .. } => {
                StatusCode::BAD_REQUEST
            }
            ProxyError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::Bind { .. } | ProxyError::Tls { .. } | ProxyError::AlreadyStarted(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let text = match self.kind() {
            ErrorKind::NoRouteMatched => "No route matched",
            ErrorKind::UpstreamUnreachable => "Upstream unreachable",
            ErrorKind::UpstreamTimeout => "Upstream timed out",
            ErrorKind::ProtocolViolation => "Upgrade not permitted on this route",
            _ => "Proxy error",
        };

        let mut response = Response::new(Body::from(text));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        // The connection is not reused after a failed exchange.
        response
            .headers_mut()
            .insert(header::CONNECTION, header::HeaderValue::from_static("close"));
        response
    }
}
