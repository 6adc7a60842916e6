//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and returns every
//! problem found rather than the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::AppConfig;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("trace.sampler_rate must be within 0.0..=1.0, got {0}")]
    SamplerRate(f64),

    #[error("trace.endpoint_url must be set for the otlp exporter")]
    MissingEndpoint,

    #[error("http.bind_address `{0}` is not a host:port pair")]
    BindAddress(String),

    #[error("http.max_body_bytes must be non-zero")]
    MaxBodyBytes,

    #[error("metrics.port must be non-zero")]
    MetricsPort,
}

/// Validate a parsed configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_host_port(&config.http.bind_address) {
        errors.push(ValidationError::BindAddress(config.http.bind_address.clone()));
    }
    if config.http.max_body_bytes == 0 {
        errors.push(ValidationError::MaxBodyBytes);
    }

    if let Some(trace) = &config.trace {
        if !(0.0..=1.0).contains(&trace.sampler_rate) {
            errors.push(ValidationError::SamplerRate(trace.sampler_rate));
        }
        if trace.exporter == crate::config::TraceExporterKind::Otlp
            && trace.endpoint_url.is_empty()
        {
            errors.push(ValidationError::MissingEndpoint);
        }
    }

    if let Some(metrics) = &config.metrics {
        if metrics.port == Some(0) {
            errors.push(ValidationError::MetricsPort);
        }
    }

    // Not enforced: rotated files would be dropped by count before they age out.
    if config.log.rotate_by_day && config.log.max_backups < config.log.max_age as usize {
        tracing::warn!(
            max_backups = config.log.max_backups,
            max_age = config.log.max_age,
            "log.rotate_by_day expects max_backups >= max_age"
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Accepts socket addresses and `name:port` pairs. Names are not resolved.
fn is_host_port(addr: &str) -> bool {
    if addr.parse::<SocketAddr>().is_ok() {
        return true;
    }
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && !host.contains(':') && port.parse::<u16>().is_ok(),
        None => false,
    }
}
