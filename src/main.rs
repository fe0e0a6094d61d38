//! route-proxy: path-based HTTP/WebSocket reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌───────────────────────────────────────────────────┐
//!                        │                   ROUTE PROXY                     │
//!                        │                                                   │
//!   Client Request       │  ┌──────────┐   ┌─────────┐   ┌──────────────┐    │
//!   ─────────────────────┼─▶│   net    │──▶│  http   │──▶│   routing    │    │
//!                        │  │ listener │   │ router  │   │ route table  │    │
//!                        │  └──────────┘   └─────────┘   └──────┬───────┘    │
//!                        │                                      ▼            │
//!   Client Response      │  ┌──────────┐   ┌─────────┐   ┌──────────────┐    │
//!   ◀────────────────────┼──│ response │◀──│ pooled  │◀──│  forwarder / │◀───┼── Upstream
//!                        │  │ relay    │   │ client  │   │  websocket   │    │
//!                        │  └──────────┘   └─────────┘   └──────────────┘    │
//!                        │                                                   │
//!                        │  config · lifecycle · observability · admin       │
//!                        └───────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{broadcast, mpsc};

use route_proxy::admin::{setup_admin_router, AdminState};
use route_proxy::config::{self, ConfigWatcher, ProxyConfig};
use route_proxy::health::{HealthMonitor, ServiceHealth};
use route_proxy::lifecycle::signals::SignalListener;
use route_proxy::lifecycle::{startup, ProcessSignal};
use route_proxy::observability::{logging, metrics};

const DEFAULT_CONFIG: &str = "proxy.toml";

#[derive(Parser)]
#[command(name = "route-proxy", version, about = "Path-based HTTP/WebSocket reverse proxy")]
struct Args {
    /// Configuration file (TOML). Defaults to ./proxy.toml when present,
    /// built-in defaults otherwise.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not watch the configuration file for changes.
    #[arg(long)]
    no_watch: bool,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config_path = args.config.clone().or_else(|| {
        let default = PathBuf::from(DEFAULT_CONFIG);
        default.exists().then_some(default)
    });

    let config = config::load(config_path.as_deref())?;
    if args.check {
        println!("configuration OK");
        return Ok(());
    }

    logging::init_logging(&config.observability)?;
    tracing::info!("route-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    log_configuration(&config, config_path.as_deref());

    let (proxy, mut applied) = startup::build(&config);
    let proxy = Arc::new(proxy);
    logging::spawn_event_logger(proxy.subscribe());

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => match metrics::init_metrics(addr) {
                Ok(()) => {
                    metrics::spawn_event_recorder(proxy.subscribe());
                    metrics::spawn_gauge_sampler(
                        proxy.controller().tracker().clone(),
                        Arc::clone(proxy.routes()),
                        Duration::from_secs(5),
                    );
                }
                Err(e) => tracing::error!(error = %e, "Failed to start metrics endpoint"),
            },
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Everything fallible happens before the proxy starts accepting.
    let mut signals = SignalListener::install()?;
    let admin_listener = startup::bind_admin(&config).await?;
    let listeners = startup::listener_specs(&config).await?;
    let addresses = match proxy.start(listeners).await {
        Ok(addresses) => addresses,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start listeners");
            return Err(e.into());
        }
    };
    for addr in &addresses {
        tracing::info!(address = %addr, "Listening for connections");
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let services = Arc::new(ServiceHealth::new(&config.services));
    let monitor = HealthMonitor::new(Arc::clone(&services), config.health_check.clone());
    tokio::spawn(monitor.run(shutdown_tx.subscribe()));

    if let Some(listener) = admin_listener {
        let state = AdminState {
            proxy: Arc::clone(&proxy),
            services: Arc::clone(&services),
            api_key: config.admin.api_key.as_str().into(),
        };
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, "Admin API listening");
        }
        let mut stop = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let served = axum::serve(listener, setup_admin_router(state))
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let (_watcher, mut updates) = match (&config_path, args.no_watch) {
        (Some(path), false) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(guard) => (Some(guard), Some(rx)),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, reload with SIGHUP");
                    (None, None)
                }
            }
        }
        _ => (None, None),
    };

    tracing::info!("Proxy is ready");

    let reason = loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Some(ProcessSignal::Shutdown(reason)) => break reason,
                Some(ProcessSignal::Reload) => {
                    tracing::info!("SIGHUP received, reloading configuration");
                    match config::load(config_path.as_deref()) {
                        Ok(next) => {
                            applied = startup::reload(&proxy, &next, &applied);
                            services.sync(&next.services);
                        }
                        Err(e) => tracing::error!(error = %e, "Reload failed, keeping current configuration"),
                    }
                }
                None => break route_proxy::ShutdownReason::Requested,
            },
            Some(next) = next_update(&mut updates) => {
                applied = startup::reload(&proxy, &next, &applied);
                services.sync(&next.services);
            }
        }
    };

    tracing::info!(signal = %reason, "Shutting down proxy gracefully");
    let report = proxy.shutdown(reason).await;
    let _ = shutdown_tx.send(());

    if report.drained() {
        tracing::info!(elapsed_ms = report.elapsed.as_millis() as u64, "Proxy closed successfully");
    } else {
        tracing::warn!(
            forced_connections = report.forced_connections,
            "Grace period expired, remaining connections were closed"
        );
    }
    Ok(())
}

async fn next_update(updates: &mut Option<mpsc::UnboundedReceiver<ProxyConfig>>) -> Option<ProxyConfig> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn log_configuration(config: &ProxyConfig, path: Option<&Path>) {
    match path {
        Some(path) => tracing::info!(path = %path.display(), "Configuration loaded"),
        None => tracing::info!("Using built-in configuration"),
    }
    tracing::info!(
        bind_address = %config.server.bind_address,
        max_connections = config.server.max_connections,
        xfwd = config.upstream.xfwd,
        rate_limit = config.rate_limit.enabled,
        "Server configuration"
    );
    if config.server.tls.enabled {
        tracing::info!(bind_address = %config.server.tls.bind_address, "TLS enabled");
    }
    for (name, service) in &config.services {
        tracing::info!(
            service = %name,
            host = %service.host,
            port = service.port,
            enabled = service.enabled,
            "Service"
        );
    }
}
