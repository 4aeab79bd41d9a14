//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define engine metrics (discovery updates, routes, short-circuits)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `policy_engine_discovery_updates_total` (counter): updates by result (ack/nack)
//! - `policy_engine_discovery_connects_total` (counter): connection attempts by result
//! - `policy_engine_discovery_state` (gauge): current client state as a number
//! - `policy_engine_routes` (gauge): routing table size
//! - `policy_engine_routes_skipped_total` (counter): routes dropped from a batch
//! - `policy_engine_short_circuits_total` (counter): immediate responses by policy
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations behind the `metrics` facade)
//! - Recording without an installed exporter is a no-op

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus exporter and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record the outcome of one discovery response.
pub fn record_discovery_update(result: &'static str) {
    counter!("policy_engine_discovery_updates_total", "result" => result).increment(1);
}

/// Record a connection attempt.
pub fn record_connect_attempt(result: &'static str) {
    counter!("policy_engine_discovery_connects_total", "result" => result).increment(1);
}

/// Record the discovery client's state.
pub fn record_client_state(state: u8) {
    gauge!("policy_engine_discovery_state").set(f64::from(state));
}

/// Record the size of the routing table after a change.
pub fn record_route_count(count: usize) {
    gauge!("policy_engine_routes").set(count as f64);
}

/// Record routes dropped while applying a batch.
pub fn record_routes_skipped(count: usize) {
    counter!("policy_engine_routes_skipped_total").increment(count as u64);
}

/// Record a chain ended early by a policy.
pub fn record_short_circuit(policy: &str) {
    counter!("policy_engine_short_circuits_total", "policy" => policy.to_string()).increment(1);
}
