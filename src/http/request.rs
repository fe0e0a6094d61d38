//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) for tracing
//! - Extract routing-relevant information (host, path)
//! - Prepare the request for forwarding to the upstream
//!
//! # Design Decisions
//! - Request ID added as early as possible and propagated upstream and back
//! - The inbound request is consumed; its body is streamed, never buffered

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::uri::{PathAndQuery, Scheme};
use axum::http::{header, Extensions, HeaderValue, Request, Uri, Version};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::error::{ProxyError, Result};
use crate::routing::Route;
use crate::security::headers::{self, InboundProto};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Issues a UUID v4 for requests arriving without an `x-request-id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Identity of the client side of one exchange.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub peer: SocketAddr,
    pub proto: InboundProto,
    pub request_id: String,
}

pub fn request_id<B>(request: &Request<B>) -> String {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Host the client addressed: the Host header, else the URI authority.
pub fn request_host<B>(request: &Request<B>) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
}

/// Rewrite an inbound request into the request sent to `route`'s target.
///
/// - URI becomes absolute (`http://target/...`), with the matched prefix
///   removed when the route strips it
/// - Host is kept unless the route changes origin
/// - Hop-by-hop headers are dropped; with `preserve_upgrade` the upgrade
///   negotiation is kept so it can be replayed upstream
pub fn upstream_request(
    route: &Route,
    request: Request<Body>,
    ctx: &ClientContext,
    xfwd: bool,
    preserve_upgrade: bool,
) -> Result<Request<Body>> {
    let original_host = request_host(&request);
    let (mut parts, body) = request.into_parts();

    let path = route.upstream_path(parts.uri.path());
    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.into_owned(),
    };
    let path_and_query = PathAndQuery::try_from(path_and_query).map_err(|e| {
        ProxyError::ProtocolViolation {
            route: route.id,
            reason: format!("cannot rewrite request path: {e}"),
        }
    })?;

    parts.uri = Uri::builder()
        .scheme(Scheme::HTTP)
        .authority(route.target.authority().as_str())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::ProtocolViolation {
            route: route.id,
            reason: format!("cannot build upstream URI: {e}"),
        })?;
    parts.version = Version::HTTP_11;
    parts.extensions = Extensions::new();

    if preserve_upgrade {
        headers::strip_hop_by_hop_for_upgrade(&mut parts.headers);
    } else {
        headers::strip_hop_by_hop(&mut parts.headers);
    }

    let host = match (&original_host, route.options.change_origin) {
        (Some(host), false) => host.clone(),
        _ => route.target.authority(),
    };
    let host = HeaderValue::from_str(&host).map_err(|e| ProxyError::ProtocolViolation {
        route: route.id,
        reason: format!("invalid Host header: {e}"),
    })?;
    parts.headers.insert(header::HOST, host);

    if xfwd {
        headers::apply_forwarded(&mut parts.headers, ctx.peer, original_host.as_deref(), ctx.proto);
    }

    Ok(Request::from_parts(parts, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::routing::{RouteOptions, RouteTable};
    use std::sync::Arc;

    fn route(prefix: &str, options: RouteOptions) -> Arc<Route> {
        let table = RouteTable::new(EventBus::new(4));
        table
            .register("*", prefix, "http://localhost:4000", options)
            .unwrap();
        table.find("localhost", prefix).unwrap()
    }

    fn ctx() -> ClientContext {
        ClientContext {
            peer: "10.1.2.3:5555".parse().unwrap(),
            proto: InboundProto::Http,
            request_id: "test".into(),
        }
    }

    fn inbound(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::HOST, "proxy.local:8080")
            .header(header::CONNECTION, "keep-alive")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn preserves_host_and_path_by_default() {
        let route = route("/api", RouteOptions::default());
        let req = upstream_request(&route, inbound("/api/users?page=2"), &ctx(), false, false).unwrap();

        assert_eq!(req.uri(), "http://localhost:4000/api/users?page=2");
        assert_eq!(req.headers()[header::HOST], "proxy.local:8080");
        assert!(!req.headers().contains_key(header::CONNECTION));
        assert!(!req.headers().contains_key("x-forwarded-for"));
    }

    #[test]
    fn change_origin_and_strip_prefix() {
        let options = RouteOptions {
            change_origin: true,
            strip_prefix: true,
            ..RouteOptions::default()
        };
        let route = route("/api", options);
        let req = upstream_request(&route, inbound("/api/users"), &ctx(), false, false).unwrap();

        assert_eq!(req.uri(), "http://localhost:4000/users");
        assert_eq!(req.headers()[header::HOST], "localhost:4000");
    }

    #[test]
    fn xfwd_adds_forwarded_headers() {
        let route = route("/", RouteOptions::default());
        let req = upstream_request(&route, inbound("/"), &ctx(), true, false).unwrap();

        assert_eq!(req.headers()["x-forwarded-for"], "10.1.2.3");
        assert_eq!(req.headers()["x-forwarded-host"], "proxy.local:8080");
        assert_eq!(req.headers()["x-forwarded-port"], "8080");
    }

    #[test]
    fn request_uuid_is_generated() {
        let req = Request::new(());
        let id = MakeRequestUuid.make_request_id(&req).unwrap();
        let text = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(text).is_ok());
    }
}
