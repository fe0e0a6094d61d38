//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing services)
//! - Validate value ranges (timeouts > 0, ports valid, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// One failed check, naming the offending field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "server.bind_address", &config.server.bind_address);
    if config.server.max_connections == 0 {
        errors.push(ValidationError::new(
            "server.max_connections",
            "must be greater than 0",
        ));
    }

    let tls = &config.server.tls;
    if tls.enabled {
        check_addr(&mut errors, "server.tls.bind_address", &tls.bind_address);
        for (field, value) in [
            ("server.tls.cert_path", &tls.cert_path),
            ("server.tls.key_path", &tls.key_path),
        ] {
            if value.as_deref().map_or(true, |p| p.trim().is_empty()) {
                errors.push(ValidationError::new(field, "required when TLS is enabled"));
            }
        }
    }

    for (name, service) in &config.services {
        if service.host.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("services.{name}.host"),
                "must not be empty",
            ));
        }
        if service.port == 0 {
            errors.push(ValidationError::new(
                format!("services.{name}.port"),
                "must be in 1..=65535",
            ));
        }
        if !service.health_check.starts_with('/') {
            errors.push(ValidationError::new(
                format!("services.{name}.health_check"),
                "must start with '/'",
            ));
        }
    }

    let mut names = HashSet::new();
    for (idx, route) in config.routes.iter().enumerate() {
        let field = if route.name.is_empty() {
            format!("routes[{idx}]")
        } else {
            format!("routes.{}", route.name)
        };

        if route.name.is_empty() {
            errors.push(ValidationError::new(&field, "name must not be empty"));
        } else if !names.insert(route.name.as_str()) {
            errors.push(ValidationError::new(&field, "duplicate route name"));
        }

        if !route.path.starts_with('/') {
            errors.push(ValidationError::new(
                format!("{field}.path"),
                "must start with '/'",
            ));
        }

        match (&route.service, &route.target) {
            (Some(_), Some(_)) => errors.push(ValidationError::new(
                &field,
                "set either service or target, not both",
            )),
            (None, None) => errors.push(ValidationError::new(
                &field,
                "one of service or target is required",
            )),
            (Some(service), None) if !config.services.contains_key(service) => {
                errors.push(ValidationError::new(
                    format!("{field}.service"),
                    format!("unknown service '{service}'"),
                ))
            }
            _ => {}
        }

        if let Err(e) = route.options().validate() {
            errors.push(ValidationError::new(&field, e.to_string()));
        }
    }

    let rate_limit = &config.rate_limit;
    if rate_limit.enabled && (rate_limit.window_secs == 0 || rate_limit.max_requests == 0) {
        errors.push(ValidationError::new(
            "rate_limit",
            "window_secs and max_requests must be greater than 0",
        ));
    }

    let health = &config.health_check;
    if health.enabled && (health.interval_secs == 0 || health.timeout_secs == 0) {
        errors.push(ValidationError::new(
            "health_check",
            "interval_secs and timeout_secs must be greater than 0",
        ));
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("expected one of {}", LOG_LEVELS.join(", ")),
        ));
    }
    if observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &observability.metrics_address,
        );
    }

    let admin = &config.admin;
    if admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &admin.bind_address);
        if admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new(
                "admin.api_key",
                "required when the admin listener is enabled",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{value}' is not a socket address"),
        ));
    }
}
