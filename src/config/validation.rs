//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, delay ordering, jitter bounds)
//! - Check TLS material is complete
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EngineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{DiscoveryConfig, EngineConfig, ObservabilityConfig};

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate the complete engine configuration.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if config.discovery.enabled {
        collect_discovery_errors(&config.discovery, &mut errors);
    }
    collect_observability_errors(&config.observability, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate discovery client settings on their own.
///
/// Used by the discovery client constructor so an invalid configuration
/// fails before any connection attempt.
pub fn validate_discovery(config: &DiscoveryConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    collect_discovery_errors(config, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn collect_discovery_errors(config: &DiscoveryConfig, errors: &mut Vec<ValidationError>) {
    if config.server_address.trim().is_empty() {
        errors.push(ValidationError::new(
            "discovery.server_address",
            "must not be empty",
        ));
    }
    if config.node_id.trim().is_empty() {
        errors.push(ValidationError::new("discovery.node_id", "must not be empty"));
    }
    if config.connect_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "discovery.connect_timeout_secs",
            "must be greater than zero",
        ));
    }
    if config.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "discovery.request_timeout_secs",
            "must be greater than zero",
        ));
    }
    if config.initial_reconnect_delay_ms == 0 {
        errors.push(ValidationError::new(
            "discovery.initial_reconnect_delay_ms",
            "must be greater than zero",
        ));
    }
    if config.max_reconnect_delay_ms < config.initial_reconnect_delay_ms {
        errors.push(ValidationError::new(
            "discovery.max_reconnect_delay_ms",
            format!(
                "must be at least initial_reconnect_delay_ms ({})",
                config.initial_reconnect_delay_ms
            ),
        ));
    }
    if !(0.0..=1.0).contains(&config.reconnect_jitter) {
        errors.push(ValidationError::new(
            "discovery.reconnect_jitter",
            "must be between 0.0 and 1.0",
        ));
    }
    if let Some(tls) = &config.tls {
        if tls.cert_path.is_some() != tls.key_path.is_some() {
            errors.push(ValidationError::new(
                "discovery.tls",
                "cert_path and key_path must be set together",
            ));
        }
    }
}

fn collect_observability_errors(config: &ObservabilityConfig, errors: &mut Vec<ValidationError>) {
    const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
    if !LEVELS.contains(&config.log_level.to_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.log_level),
        ));
    }
    if config.metrics_enabled && config.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.metrics_address),
        ));
    }
}
