//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.
//! Built-in defaults describe the stock deployment: a frontend on `/`, a
//! backend API under several prefixes and a data-fetch service on `/fetch`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::routing::RouteOptions;

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS, drain).
    pub server: ServerConfig,

    /// Upstream connection settings shared by every route.
    pub upstream: UpstreamConfig,

    /// Named upstream services, referenced by routes.
    pub services: BTreeMap<String, ServiceConfig>,

    /// Route definitions mapping host + path prefix to a service or target.
    pub routes: Vec<RouteConfig>,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Service health probe settings.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let services = BTreeMap::from([
            ("frontend".to_string(), ServiceConfig::new("localhost", 3000, "/")),
            ("backend".to_string(), ServiceConfig::new("localhost", 4000, "/health")),
            ("fetch_data".to_string(), ServiceConfig::new("localhost", 2000, "/")),
        ]);

        let mut routes = vec![RouteConfig {
            websocket: true,
            ..RouteConfig::to_service("frontend", "/", "frontend")
        }];
        for name in ["api", "auth", "saml", "upload", "reports"] {
            routes.push(RouteConfig::to_service(name, &format!("/{name}"), "backend"));
        }
        routes.push(RouteConfig {
            timeout_ms: 5_000,
            ..RouteConfig::to_service("health", "/health", "backend")
        });
        routes.push(RouteConfig::to_service("fetch_data", "/fetch", "fetch_data"));

        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            services,
            routes,
            rate_limit: RateLimitConfig::default(),
            health_check: HealthCheckConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Plain HTTP bind address (e.g., "0.0.0.0:80").
    pub bind_address: String,

    /// Maximum concurrent connections per listener (backpressure).
    pub max_connections: usize,

    /// Time in-flight requests get to finish on shutdown.
    pub grace_period_secs: u64,

    pub tls_handshake_timeout_secs: u64,

    pub tls: TlsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:80".to_string(),
            max_connections: 10_000,
            grace_period_secs: 10,
            tls_handshake_timeout_secs: 10,
            tls: TlsConfig::default(),
        }
    }
}

/// Optional TLS-terminating listener.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,

    pub bind_address: String,

    /// Path to certificate file (PEM).
    pub cert_path: Option<String>,

    /// Path to private key file (PEM).
    pub key_path: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "0.0.0.0:443".to_string(),
            cert_path: None,
            key_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Add X-Forwarded-For/Host/Proto/Port to forwarded requests.
    pub xfwd: bool,

    /// Idle pooled connections are closed after this many seconds.
    pub pool_idle_timeout_secs: u64,

    pub pool_max_idle_per_host: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            xfwd: false,
            pool_idle_timeout_secs: 90,
            pool_max_idle_per_host: 32,
        }
    }
}

/// An upstream service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub host: String,

    pub port: u16,

    /// Path probed by the health monitor.
    #[serde(default = "default_health_path")]
    pub health_check: String,

    /// Routes to a disabled service are skipped.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ServiceConfig {
    pub fn new(host: &str, port: u16, health_check: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            health_check: health_check.to_string(),
            enabled: true,
        }
    }

    /// `http://host:port`
    pub fn target(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

fn default_health_path() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

/// A route: host pattern + path prefix forwarded to a service or an explicit target.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging.
    pub name: String,

    /// Host to match; "*" matches any host.
    #[serde(default = "default_route_host")]
    pub host: String,

    /// Path prefix to match.
    pub path: String,

    /// Service to forward to.
    #[serde(default)]
    pub service: Option<String>,

    /// Explicit target URL, used when no service is named.
    #[serde(default)]
    pub target: Option<String>,

    #[serde(default = "default_true")]
    pub change_origin: bool,

    #[serde(default)]
    pub websocket: bool,

    #[serde(default)]
    pub strip_prefix: bool,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Defaults to the larger of `timeout_ms` and 30 s.
    #[serde(default)]
    pub proxy_timeout_ms: Option<u64>,
}

impl RouteConfig {
    pub fn to_service(name: &str, path: &str, service: &str) -> Self {
        Self {
            name: name.to_string(),
            host: default_route_host(),
            path: path.to_string(),
            service: Some(service.to_string()),
            target: None,
            change_origin: true,
            websocket: false,
            strip_prefix: false,
            timeout_ms: default_timeout_ms(),
            proxy_timeout_ms: None,
        }
    }

    pub fn options(&self) -> RouteOptions {
        RouteOptions {
            change_origin: self.change_origin,
            websocket_upgrade: self.websocket,
            strip_prefix: self.strip_prefix,
            timeout_ms: self.timeout_ms,
            proxy_timeout_ms: self
                .proxy_timeout_ms
                .unwrap_or_else(|| self.timeout_ms.max(default_timeout_ms())),
        }
    }
}

fn default_route_host() -> String {
    "*".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Length of one counting window in seconds.
    pub window_secs: u64,

    /// Requests allowed per client IP in one window.
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_secs: 15 * 60,
            max_requests: 100,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 30,
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Turn all log output off.
    pub logging_enabled: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            logging_enabled: true,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Admin diagnostics configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the diagnostics listener.
    pub enabled: bool,

    /// API key for authentication (Bearer token). Required when enabled.
    pub api_key: String,

    /// Admin bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_stock_deployment() {
        let config = ProxyConfig::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:80");
        assert_eq!(config.services["backend"].target(), "http://localhost:4000");
        assert_eq!(config.routes.len(), 8);

        let root = &config.routes[0];
        assert_eq!(root.path, "/");
        assert!(root.websocket && root.change_origin);

        let health = config.routes.iter().find(|r| r.name == "health").unwrap();
        let options = health.options();
        assert_eq!(options.timeout_ms, 5_000);
        assert_eq!(options.proxy_timeout_ms, 30_000);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [server]
            bind_address = "127.0.0.1:8080"

            [rate_limit]
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:8080");
        assert_eq!(config.server.grace_period_secs, 10);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.routes.len(), 8);
    }

    #[test]
    fn route_table_from_file() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [services.api]
            host = "10.0.0.5"
            port = 8000

            [[routes]]
            name = "api"
            path = "/v1"
            service = "api"
            strip_prefix = true
            timeout_ms = 45000

            [[routes]]
            name = "legacy"
            host = "old.example.com"
            path = "/"
            target = "http://10.0.0.9:80"
            change_origin = false
            "#,
        )
        .unwrap();

        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services["api"].health_check, "/");
        assert!(config.services["api"].enabled);

        let api = &config.routes[0];
        assert_eq!(api.host, "*");
        assert_eq!(api.options().proxy_timeout_ms, 45_000);
        assert!(api.options().strip_prefix);

        let legacy = &config.routes[1];
        assert_eq!(legacy.target.as_deref(), Some("http://10.0.0.9:80"));
        assert!(!legacy.change_origin);
    }
}
