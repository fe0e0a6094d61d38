//! Header policy for forwarded traffic.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Apply the Host policy (`change_origin`)
//! - Add X-Forwarded-* when enabled
//!
//! # Design Decisions
//! - Headers named by `Connection` are hop-by-hop too (RFC 9110 §7.6.1)
//! - X-Forwarded-For is appended to, never replaced

use std::net::SocketAddr;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

/// Scheme the client used to reach the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundProto {
    Http,
    Https,
}

impl InboundProto {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboundProto::Http => "http",
            InboundProto::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            InboundProto::Http => 80,
            InboundProto::Https => 443,
        }
    }
}

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");

static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

/// Remove hop-by-hop headers, including `Upgrade` and every header listed in
/// `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    strip_connection_listed(headers);
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(header::UPGRADE);
}

/// Like [`strip_hop_by_hop`] but leaves the upgrade negotiation in place so it
/// can be replayed against the upstream.
pub fn strip_hop_by_hop_for_upgrade(headers: &mut HeaderMap) {
    let upgrade = headers.get(header::UPGRADE).cloned();
    strip_hop_by_hop(headers);
    if let Some(upgrade) = upgrade {
        headers.insert(header::UPGRADE, upgrade);
        headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    }
}

fn strip_connection_listed(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
}

/// True when the `Connection` header carries `token` (case-insensitive).
pub fn connection_has_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Append the client to X-Forwarded-For and set the Host/Proto/Port headers.
pub fn apply_forwarded(
    headers: &mut HeaderMap,
    peer: SocketAddr,
    original_host: Option<&str>,
    proto: InboundProto,
) {
    let client_ip = peer.ip().to_string();
    let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}, {client_ip}"),
        _ => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if let Some(host) = original_host {
        if !headers.contains_key(&X_FORWARDED_HOST) {
            if let Ok(value) = HeaderValue::from_str(host) {
                headers.insert(X_FORWARDED_HOST, value);
            }
        }
    }

    if !headers.contains_key(&X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto.as_str()));
    }

    if !headers.contains_key(&X_FORWARDED_PORT) {
        let port = original_host
            .and_then(|h| h.rsplit_once(':'))
            .and_then(|(_, port)| port.parse::<u16>().ok())
            .unwrap_or_else(|| proto.default_port());
        headers.insert(X_FORWARDED_PORT, HeaderValue::from(port));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_hop_by_hop_and_connection_listed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }

    #[test]
    fn keeps_upgrade_negotiation() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert("sec-websocket-key", HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="));

        strip_hop_by_hop_for_upgrade(&mut headers);

        assert_eq!(headers[header::UPGRADE], "websocket");
        assert_eq!(headers[header::CONNECTION], "upgrade");
        assert!(headers.contains_key("sec-websocket-key"));
    }

    #[test]
    fn connection_tokens() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(connection_has_token(&headers, "upgrade"));
        assert!(!connection_has_token(&headers, "close"));
    }

    #[test]
    fn forwarded_headers_append() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        let peer: SocketAddr = "192.168.1.5:50000".parse().unwrap();

        apply_forwarded(&mut headers, peer, Some("app.local:8080"), InboundProto::Http);

        assert_eq!(headers["x-forwarded-for"], "10.0.0.1, 192.168.1.5");
        assert_eq!(headers["x-forwarded-host"], "app.local:8080");
        assert_eq!(headers["x-forwarded-proto"], "http");
        assert_eq!(headers["x-forwarded-port"], "8080");
    }

    #[test]
    fn forwarded_port_defaults_by_scheme() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();
        apply_forwarded(&mut headers, peer, Some("secure.local"), InboundProto::Https);
        assert_eq!(headers["x-forwarded-port"], "443");
        assert_eq!(headers["x-forwarded-proto"], "https");
    }
}
