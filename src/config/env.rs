//! Environment variable overrides.
//!
//! Applied after the file is parsed and before validation. Variables:
//!
//! | Variable | Field |
//! |---|---|
//! | `PROXY_HOST`, `PROXY_PORT` | `server.bind_address` |
//! | `SSL_ENABLED` (`true` enables) | `server.tls.enabled` |
//! | `SSL_PORT` | `server.tls.bind_address` |
//! | `SSL_KEY_PATH`, `SSL_CERT_PATH` | `server.tls.key_path`, `server.tls.cert_path` |
//! | `<SERVICE>_HOST`, `<SERVICE>_PORT` | `services.<service>` |
//! | `<SERVICE>_ENABLED` (`false` disables) | `services.<service>.enabled` |
//! | `RATE_LIMIT_ENABLED` (`true` enables) | `rate_limit.enabled` |
//! | `LOG_LEVEL` | `observability.log_level` |
//! | `LOGGING_ENABLED` (`false` disables) | `observability.logging_enabled` |
//!
//! `<SERVICE>` is the service name in upper snake case (`fetch_data` → `FETCH_DATA`).

use crate::config::loader::ConfigError;
use crate::config::schema::ProxyConfig;

/// Apply overrides using `lookup` to read variables.
pub fn apply_overrides<F>(config: &mut ProxyConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("PROXY_HOST") {
        config.server.bind_address = with_host(&config.server.bind_address, &host);
    }
    if let Some(port) = lookup("PROXY_PORT") {
        let port = parse_port("PROXY_PORT", &port)?;
        config.server.bind_address = with_port(&config.server.bind_address, port);
    }

    let tls = &mut config.server.tls;
    if let Some(enabled) = lookup("SSL_ENABLED") {
        tls.enabled = enabled == "true";
    }
    if let Some(port) = lookup("SSL_PORT") {
        let port = parse_port("SSL_PORT", &port)?;
        tls.bind_address = with_port(&tls.bind_address, port);
    }
    if let Some(path) = lookup("SSL_KEY_PATH") {
        tls.key_path = Some(path);
    }
    if let Some(path) = lookup("SSL_CERT_PATH") {
        tls.cert_path = Some(path);
    }

    for (name, service) in config.services.iter_mut() {
        let prefix = env_prefix(name);
        if let Some(host) = lookup(&format!("{prefix}_HOST")) {
            service.host = host;
        }
        let port_var = format!("{prefix}_PORT");
        if let Some(port) = lookup(&port_var) {
            service.port = parse_port(&port_var, &port)?;
        }
        if let Some(enabled) = lookup(&format!("{prefix}_ENABLED")) {
            service.enabled = enabled != "false";
        }
    }

    if let Some(enabled) = lookup("RATE_LIMIT_ENABLED") {
        config.rate_limit.enabled = enabled == "true";
    }
    if let Some(level) = lookup("LOG_LEVEL") {
        config.observability.log_level = level;
    }
    if let Some(enabled) = lookup("LOGGING_ENABLED") {
        config.observability.logging_enabled = enabled != "false";
    }

    Ok(())
}

fn env_prefix(service: &str) -> String {
    service
        .chars()
        .map(|c| match c {
            '-' | '.' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

fn parse_port(var: &str, value: &str) -> Result<u16, ConfigError> {
    match value.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ConfigError::Env {
            var: var.to_string(),
            value: value.to_string(),
            reason: "expected a port in 1..=65535".to_string(),
        }),
    }
}

fn split_addr(addr: &str) -> (&str, &str) {
    addr.rsplit_once(':').unwrap_or((addr, ""))
}

fn with_host(addr: &str, host: &str) -> String {
    let (_, port) = split_addr(addr);
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn with_port(addr: &str, port: u16) -> String {
    let (host, _) = split_addr(addr);
    format!("{host}:{port}")
}
