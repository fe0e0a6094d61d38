//! Route definitions.
//!
//! A [`Route`] is immutable once it has been inserted into the table. Updates
//! produce a new `Arc<Route>` in a new table snapshot, so a request that has
//! already been matched keeps the copy it was matched against.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use url::Url;

use crate::error::{ProxyError, Result};

/// Stable identifier handed out by `register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RouteId(u64);

impl RouteId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route-{}", self.0)
    }
}

/// Virtual host a route applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostPattern {
    /// `*`: any host.
    Any,
    /// A single host name, stored lowercase and without port.
    Exact(String),
}

impl HostPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() || pattern == "*" {
            return Ok(HostPattern::Any);
        }
        if pattern.contains('*') {
            return Err(ProxyError::invalid_route(format!(
                "host pattern '{pattern}' may only be '*' or an exact host"
            )));
        }
        if pattern.contains('/') || pattern.chars().any(char::is_whitespace) {
            return Err(ProxyError::invalid_route(format!(
                "host pattern '{pattern}' is not a host name"
            )));
        }
        Ok(HostPattern::Exact(strip_port(pattern).to_ascii_lowercase()))
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, HostPattern::Exact(_))
    }

    /// `host` must already be normalized with [`normalize_host`].
    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Any => true,
            HostPattern::Exact(expected) => expected == host,
        }
    }
}

impl fmt::Display for HostPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostPattern::Any => f.write_str("*"),
            HostPattern::Exact(host) => f.write_str(host),
        }
    }
}

impl Serialize for HostPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Lowercase a Host header value and drop its port.
pub fn normalize_host(host: &str) -> String {
    strip_port(host.trim()).to_ascii_lowercase()
}

fn strip_port(host: &str) -> &str {
    // Bracketed IPv6 literal, e.g. "[::1]:8080".
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Validate a path prefix and bring it to canonical form (no trailing `/`
/// except for the root prefix).
pub fn normalize_prefix(prefix: &str) -> Result<String> {
    if prefix.is_empty() {
        return Err(ProxyError::invalid_route("path prefix is empty"));
    }
    if !prefix.starts_with('/') {
        return Err(ProxyError::invalid_route(format!(
            "path prefix '{prefix}' must start with '/'"
        )));
    }
    if prefix.contains(['?', '#']) || prefix.chars().any(char::is_whitespace) {
        return Err(ProxyError::invalid_route(format!(
            "path prefix '{prefix}' contains a query, fragment or whitespace"
        )));
    }
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

/// Upstream endpoint a route forwards to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    scheme: String,
    host: String,
    port: u16,
}

impl Target {
    /// Parse `http://host:port` (or `ws://`). A bare `host:port` is read as HTTP.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ProxyError::invalid_route("target is empty"));
        }
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| ProxyError::invalid_route(format!("target '{raw}' is unparsable: {e}")))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "http",
            other => {
                return Err(ProxyError::invalid_route(format!(
                    "target scheme '{other}' is not supported"
                )))
            }
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProxyError::invalid_route(format!("target '{raw}' has no host")))?;
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(ProxyError::invalid_route(format!(
                "target '{raw}' must not carry a path, query or fragment"
            )));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(ProxyError::invalid_route(format!(
                "target '{raw}' must not carry credentials"
            )));
        }

        let port = url.port_or_known_default().unwrap_or(80);
        Self::new(scheme, host, port)
    }

    pub fn new(scheme: &str, host: &str, port: u16) -> Result<Self> {
        if host.is_empty() {
            return Err(ProxyError::invalid_route("target host is empty"));
        }
        if port == 0 {
            return Err(ProxyError::invalid_route(
                "target port must be in range 1..=65535",
            ));
        }
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, as used for the upstream URI and a rewritten Host header.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Per-route forwarding options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteOptions {
    /// Rewrite the upstream Host header to the target's `host:port`.
    pub change_origin: bool,
    /// Allow `Upgrade: websocket` requests on this route.
    pub websocket_upgrade: bool,
    /// Remove the matched prefix from the path sent upstream.
    pub strip_prefix: bool,
    /// Deadline for connecting and receiving the response head.
    pub timeout_ms: u64,
    /// Deadline for the whole exchange, response body included.
    pub proxy_timeout_ms: u64,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            change_origin: false,
            websocket_upgrade: false,
            strip_prefix: false,
            timeout_ms: 30_000,
            proxy_timeout_ms: 30_000,
        }
    }
}

impl RouteOptions {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(ProxyError::invalid_route("timeout_ms must be greater than 0"));
        }
        if self.proxy_timeout_ms == 0 {
            return Err(ProxyError::invalid_route(
                "proxy_timeout_ms must be greater than 0",
            ));
        }
        if self.proxy_timeout_ms < self.timeout_ms {
            return Err(ProxyError::invalid_route(format!(
                "proxy_timeout_ms ({}) is shorter than timeout_ms ({})",
                self.proxy_timeout_ms, self.timeout_ms
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_timeout_ms)
    }
}

/// A registered route.
#[derive(Debug, Clone, Serialize)]
pub struct Route {
    pub id: RouteId,
    pub host_pattern: HostPattern,
    pub path_prefix: String,
    pub target: Target,
    pub options: RouteOptions,
    /// Registration sequence number, larger is more recent.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Route {
    /// Segment-aware prefix test: `/api` covers `/api` and `/api/x`, not `/apix`.
    pub fn covers_path(&self, path: &str) -> bool {
        if self.path_prefix == "/" {
            return true;
        }
        match path.strip_prefix(self.path_prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// The path to send upstream, honouring `strip_prefix`.
    pub fn upstream_path<'a>(&self, path: &'a str) -> std::borrow::Cow<'a, str> {
        if !self.options.strip_prefix || self.path_prefix == "/" {
            return path.into();
        }
        match path.strip_prefix(self.path_prefix.as_str()) {
            Some("") => "/".into(),
            Some(rest) => rest.into(),
            None => path.into(),
        }
    }
}
