//! Startup orchestration.
//!
//! # Responsibilities
//! - Turn a validated configuration into proxy options, routes and listeners
//! - Register the route set, and re-apply it on reload
//!
//! # Design Decisions
//! - Routes to disabled services are skipped, not errors
//! - A route that fails to register is reported and skipped; the rest still register
//! - Reload registers first (replacing same host + prefix) and only then
//!   removes routes that are gone, so a path never goes briefly unrouted

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::ForwarderConfig;
use crate::lifecycle::LifecycleSettings;
use crate::net::{tls, ListenerSpec};
use crate::proxy::{Proxy, ProxyOptions};
use crate::routing::{RouteId, RouteOptions, RouteTable};
use crate::security::RateLimitSettings;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("invalid listen address '{0}'")]
    Address(String),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("cannot bind admin listener on {addr}: {source}")]
    AdminBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// One route ready for the Registry API.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRegistration {
    pub name: String,
    pub host: String,
    pub path: String,
    pub target: String,
    pub options: RouteOptions,
}

/// Ids currently registered from configuration.
#[derive(Debug, Clone, Default)]
pub struct AppliedRoutes {
    ids: HashSet<RouteId>,
}

impl AppliedRoutes {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: RouteId) -> bool {
        self.ids.contains(&id)
    }
}

/// Result of applying a route set.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub applied: AppliedRoutes,
    pub registered: Vec<(String, RouteId)>,
    pub failed: Vec<(String, ProxyError)>,
    pub removed: Vec<RouteId>,
}

pub fn proxy_options(config: &ProxyConfig) -> ProxyOptions {
    ProxyOptions {
        forwarder: ForwarderConfig {
            xfwd: config.upstream.xfwd,
            pool_idle_timeout: Duration::from_secs(config.upstream.pool_idle_timeout_secs),
            pool_max_idle_per_host: config.upstream.pool_max_idle_per_host,
        },
        lifecycle: LifecycleSettings {
            max_connections: config.server.max_connections,
            grace_period: Duration::from_secs(config.server.grace_period_secs),
            tls_handshake_timeout: Duration::from_secs(config.server.tls_handshake_timeout_secs),
        },
        rate_limit: config.rate_limit.enabled.then(|| RateLimitSettings {
            window: Duration::from_secs(config.rate_limit.window_secs),
            max_requests: config.rate_limit.max_requests,
        }),
        ..ProxyOptions::default()
    }
}

/// Resolve configured routes to targets, dropping routes to disabled services.
pub fn route_registrations(config: &ProxyConfig) -> Vec<RouteRegistration> {
    config
        .routes
        .iter()
        .filter_map(|route| {
            let target = match (&route.service, &route.target) {
                (Some(name), _) => {
                    let service = config.services.get(name)?;
                    if !service.enabled {
                        tracing::info!(route = %route.name, service = %name, "Service disabled, route skipped");
                        return None;
                    }
                    service.target()
                }
                (None, Some(target)) => target.clone(),
                (None, None) => return None,
            };
            Some(RouteRegistration {
                name: route.name.clone(),
                host: route.host.clone(),
                path: route.path.clone(),
                target,
                options: route.options(),
            })
        })
        .collect()
}

/// Register `routes`, then unregister whatever `previous` held that is no
/// longer present.
pub fn apply_routes(
    table: &RouteTable,
    routes: &[RouteRegistration],
    previous: &AppliedRoutes,
) -> ApplyReport {
    let mut report = ApplyReport::default();

    for route in routes {
        match table.register(&route.host, &route.path, &route.target, route.options) {
            Ok(id) => {
                report.applied.ids.insert(id);
                report.registered.push((route.name.clone(), id));
            }
            Err(e) => report.failed.push((route.name.clone(), e)),
        }
    }

    for id in previous.ids.difference(&report.applied.ids) {
        match table.unregister(*id) {
            Ok(()) => report.removed.push(*id),
            // Already gone, e.g. removed through the Registry API.
            Err(ProxyError::RouteNotFound(_)) => {}
            Err(e) => report.failed.push((id.to_string(), e)),
        }
    }

    report
}

/// Log the outcome of `apply_routes`.
pub fn log_report(report: &ApplyReport, routes: &[RouteRegistration]) {
    for (name, id) in &report.registered {
        if let Some(route) = routes.iter().find(|r| &r.name == name) {
            tracing::info!(
                route = %name,
                id = %id,
                host = %route.host,
                path = %route.path,
                target = %route.target,
                "Registered route"
            );
        }
    }
    for (name, error) in &report.failed {
        tracing::error!(route = %name, error = %error, "Failed to register route");
    }
    for id in &report.removed {
        tracing::info!(id = %id, "Removed route no longer in configuration");
    }
}

/// Listeners to bind: plain HTTP always, TLS when enabled.
pub async fn listener_specs(config: &ProxyConfig) -> Result<Vec<ListenerSpec>, StartupError> {
    let mut specs = vec![ListenerSpec::plain(parse_addr(&config.server.bind_address)?)];

    let tls_config = &config.server.tls;
    if tls_config.enabled {
        let addr = parse_addr(&tls_config.bind_address)?;
        let (Some(cert), Some(key)) = (&tls_config.cert_path, &tls_config.key_path) else {
            return Err(StartupError::Proxy(ProxyError::Tls {
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "TLS enabled without cert_path and key_path",
                ),
            }));
        };
        let acceptor = tls::load_acceptor(Path::new(cert), Path::new(key)).await?;
        specs.push(ListenerSpec::tls(addr, acceptor));
    }

    Ok(specs)
}

/// Bind the admin listener when the admin surface is enabled. Called before
/// the proxy starts, so a failure leaves no listener running.
pub async fn bind_admin(config: &ProxyConfig) -> Result<Option<TcpListener>, StartupError> {
    if !config.admin.enabled {
        return Ok(None);
    }
    let addr = parse_addr(&config.admin.bind_address)?;
    TcpListener::bind(addr)
        .await
        .map(Some)
        .map_err(|source| StartupError::AdminBind {
            addr: config.admin.bind_address.clone(),
            source,
        })
}

fn parse_addr(value: &str) -> Result<SocketAddr, StartupError> {
    value
        .parse()
        .map_err(|_| StartupError::Address(value.to_string()))
}

/// Build the proxy and register the configured routes. Listeners are not
/// bound yet.
pub fn build(config: &ProxyConfig) -> (Proxy, AppliedRoutes) {
    let proxy = Proxy::new(proxy_options(config));
    let routes = route_registrations(config);
    let report = apply_routes(proxy.routes(), &routes, &AppliedRoutes::default());
    log_report(&report, &routes);
    (proxy, report.applied)
}

/// Apply a reloaded configuration's routes to a running proxy.
pub fn reload(proxy: &Proxy, config: &ProxyConfig, previous: &AppliedRoutes) -> AppliedRoutes {
    let routes = route_registrations(config);
    let report = apply_routes(proxy.routes(), &routes, previous);
    log_report(&report, &routes);
    tracing::info!(
        routes = report.applied.len(),
        failed = report.failed.len(),
        removed = report.removed.len(),
        "Configuration reloaded"
    );
    report.applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::events::EventBus;

    #[test]
    fn disabled_services_are_skipped() {
        let mut config = ProxyConfig::default();
        config.services.get_mut("backend").unwrap().enabled = false;

        let routes = route_registrations(&config);
        assert_eq!(routes.len(), 2);
        assert!(routes.iter().all(|r| r.target != "http://localhost:4000"));
    }

    #[test]
    fn default_routes_register() {
        let config = ProxyConfig::default();
        let (proxy, applied) = build(&config);
        assert_eq!(applied.len(), 8);

        let route = proxy.routes().find("example.com", "/api/users").unwrap();
        assert_eq!(route.path_prefix, "/api");
        assert_eq!(route.target.port(), 4000);

        let route = proxy.routes().find("example.com", "/dashboard").unwrap();
        assert!(route.options.websocket_upgrade);
        assert_eq!(route.target.port(), 3000);
    }

    #[test]
    fn reload_replaces_and_removes() {
        let table = RouteTable::new(EventBus::new(16));
        let mut config = ProxyConfig::default();
        let first = apply_routes(&table, &route_registrations(&config), &AppliedRoutes::default());
        let api = table.find("h", "/api").unwrap().id;

        config.services.get_mut("backend").unwrap().port = 4100;
        config.routes.retain(|r| r.name != "fetch_data");
        let second = apply_routes(&table, &route_registrations(&config), &first.applied);

        assert_eq!(second.removed.len(), 1);
        assert_eq!(table.len(), 7);
        let route = table.find("h", "/api").unwrap();
        assert_eq!(route.id, api);
        assert_eq!(route.target.port(), 4100);
        // /fetch now falls through to the frontend.
        assert_eq!(table.find("h", "/fetch").unwrap().target.port(), 3000);
    }

    #[test]
    fn failed_route_does_not_block_others() {
        let table = RouteTable::new(EventBus::new(16));
        let routes = vec![
            RouteRegistration {
                name: "bad".into(),
                host: "*".into(),
                path: "/bad".into(),
                target: "ftp://files:21".into(),
                options: RouteOptions::default(),
            },
            RouteRegistration {
                name: "good".into(),
                host: "*".into(),
                path: "/good".into(),
                target: "http://localhost:4000".into(),
                options: RouteOptions::default(),
            },
        ];
        let report = apply_routes(&table, &routes, &AppliedRoutes::default());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "bad");
        assert_eq!(report.applied.len(), 1);
    }

    #[test]
    fn explicit_targets() {
        let mut config = ProxyConfig::default();
        config.routes = vec![RouteConfig {
            service: None,
            target: Some("http://10.1.2.3:8080".into()),
            ..RouteConfig::to_service("direct", "/direct", "unused")
        }];
        let routes = route_registrations(&config);
        assert_eq!(routes[0].target, "http://10.1.2.3:8080");
    }

    #[tokio::test]
    async fn plain_listener_only_by_default() {
        let specs = listener_specs(&ProxyConfig::default()).await.unwrap();
        assert_eq!(specs.len(), 1);
        assert!(!specs[0].is_tls());
        assert_eq!(specs[0].addr.port(), 80);
    }

    #[tokio::test]
    async fn admin_bind_failure_is_reported() {
        let mut config = ProxyConfig::default();
        assert!(bind_admin(&config).await.unwrap().is_none());

        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        config.admin.enabled = true;
        config.admin.api_key = "secret".into();
        config.admin.bind_address = occupied.local_addr().unwrap().to_string();
        let err = bind_admin(&config).await.unwrap_err();
        assert!(matches!(err, StartupError::AdminBind { .. }));

        config.admin.bind_address = "127.0.0.1:0".into();
        let listener = bind_admin(&config).await.unwrap().unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
