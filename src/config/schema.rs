//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the policy engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Discovery (xDS) client settings.
    pub discovery: DiscoveryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Connection settings for the configuration-discovery server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Enable the discovery client.
    pub enabled: bool,

    /// Discovery server address (e.g., "http://127.0.0.1:18000").
    pub server_address: String,

    /// Node identifier reported to the server.
    pub node_id: String,

    /// Cluster reported to the server.
    pub cluster: String,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Timeout for opening the discovery stream in seconds.
    pub request_timeout_secs: u64,

    /// First reconnect delay in milliseconds.
    pub initial_reconnect_delay_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds.
    pub max_reconnect_delay_ms: u64,

    /// Random jitter added to each reconnect wait, as a fraction of the delay
    /// (0.0 disables jitter).
    pub reconnect_jitter: f64,

    /// Optional TLS material for the discovery connection.
    pub tls: Option<TlsConfig>,
}

impl DiscoveryConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn initial_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.initial_reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server_address: "http://127.0.0.1:18000".to_string(),
            node_id: "policy-engine".to_string(),
            cluster: "policy-engine-cluster".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            initial_reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 60_000,
            reconnect_jitter: 0.0,
            tls: None,
        }
    }
}

/// TLS configuration for the discovery connection.
///
/// `cert_path` and `key_path` enable mutual TLS and must be given together.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to the CA bundle used to verify the server (PEM).
    pub ca_path: Option<String>,

    /// Path to the client certificate (PEM).
    pub cert_path: Option<String>,

    /// Path to the client private key (PEM).
    pub key_path: Option<String>,

    /// Override for the server name checked against the certificate.
    pub server_name: Option<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
