//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe each enabled service's health path
//! - Keep the latest result per service for diagnostics

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::Request;
use dashmap::DashMap;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::{HealthCheckConfig, ServiceConfig};
use crate::observability::metrics;

/// Latest probe result for one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub target: String,
    pub health_check: String,
    pub enabled: bool,
    /// `None` until the first probe completes.
    pub healthy: Option<bool>,
    pub last_status: Option<u16>,
    pub last_error: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub last_checked_ms: Option<u64>,
    pub consecutive_failures: u32,
}

impl ServiceStatus {
    fn new(name: &str, service: &ServiceConfig) -> Self {
        Self {
            name: name.to_string(),
            target: service.target(),
            health_check: service.health_check.clone(),
            enabled: service.enabled,
            healthy: None,
            last_status: None,
            last_error: None,
            last_checked_ms: None,
            consecutive_failures: 0,
        }
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Status(u16),
    Failed(String),
}

/// Shared store of service health, keyed by service name.
#[derive(Debug, Default)]
pub struct ServiceHealth {
    statuses: DashMap<String, ServiceStatus>,
}

impl ServiceHealth {
    pub fn new(services: &BTreeMap<String, ServiceConfig>) -> Self {
        let health = Self::default();
        health.sync(services);
        health
    }

    /// Replace the tracked service set. Results survive for services whose
    /// target and health path did not change.
    pub fn sync(&self, services: &BTreeMap<String, ServiceConfig>) {
        self.statuses.retain(|name, _| services.contains_key(name));
        for (name, service) in services {
            let fresh = ServiceStatus::new(name, service);
            let mut entry = self.statuses.entry(name.clone()).or_insert_with(|| fresh.clone());
            if entry.target != fresh.target || entry.health_check != fresh.health_check {
                *entry = fresh;
            } else {
                entry.enabled = fresh.enabled;
            }
        }
    }

    pub fn record(&self, name: &str, outcome: ProbeOutcome) {
        let Some(mut status) = self.statuses.get_mut(name) else {
            return;
        };
        status.last_checked_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_millis() as u64);

        let healthy = match outcome {
            ProbeOutcome::Status(code) => {
                status.last_status = Some(code);
                status.last_error = None;
                (200..300).contains(&code)
            }
            ProbeOutcome::Failed(error) => {
                status.last_status = None;
                status.last_error = Some(error);
                false
            }
        };
        status.healthy = Some(healthy);
        status.consecutive_failures = if healthy {
            0
        } else {
            status.consecutive_failures.saturating_add(1)
        };
    }

    pub fn get(&self, name: &str) -> Option<ServiceStatus> {
        self.statuses.get(name).map(|s| s.clone())
    }

    /// All services, sorted by name.
    pub fn snapshot(&self) -> Vec<ServiceStatus> {
        let mut all: Vec<ServiceStatus> = self.statuses.iter().map(|s| s.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

pub struct HealthMonitor {
    services: Arc<ServiceHealth>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(services: Arc<ServiceHealth>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            services,
            config,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Service health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    pub async fn check_all(&self) {
        let services: Vec<ServiceStatus> = self
            .services
            .snapshot()
            .into_iter()
            .filter(|s| s.enabled)
            .collect();

        let probes = services.iter().map(|service| async move {
            let outcome = self.probe(service).await;
            (service, outcome)
        });

        for (service, outcome) in futures_util::future::join_all(probes).await {
            match &outcome {
                ProbeOutcome::Status(code) if !(200..300).contains(code) => {
                    tracing::warn!(service = %service.name, status = code, "Health check failed: non-success status");
                }
                ProbeOutcome::Failed(error) => {
                    tracing::warn!(service = %service.name, error = %error, "Health check failed");
                }
                _ => {}
            }
            self.services.record(&service.name, outcome);
            if let Some(status) = self.services.get(&service.name) {
                metrics::record_service_health(&service.name, status.healthy == Some(true));
            }
        }
    }

    async fn probe(&self, service: &ServiceStatus) -> ProbeOutcome {
        let request = match Request::builder()
            .method("GET")
            .uri(format!("{}{}", service.target, service.health_check))
            .header("user-agent", "route-proxy-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => return ProbeOutcome::Failed(format!("invalid probe request: {e}")),
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => ProbeOutcome::Status(response.status().as_u16()),
            Ok(Err(e)) => ProbeOutcome::Failed(format!("connection error: {e}")),
            Err(_) => ProbeOutcome::Failed("timeout".to_string()),
        }
    }
}
