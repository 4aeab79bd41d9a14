//! Applies discovery batches to the kernel.
//!
//! # Data Flow
//! ```text
//! [Any] → decode every resource (any failure: abort, nothing applied)
//!       → per route: well formed? key present? every policy
//!                    named, versioned and registered?          (no: skip route)
//!       → build_policy_chain                                 (error: skip route)
//!       → Kernel::replace_all(new table)
//! ```
//!
//! # Design Decisions
//! - State of the world: the batch is the whole configuration, so an empty
//!   batch clears the table
//! - One bad route never blocks the others

use prost_types::Any;
use std::sync::Arc;
use thiserror::Error;

use crate::kernel::{Kernel, RouteTable};
use crate::observability::metrics;
use crate::policy::{build_policy_chain, PolicyRegistry, PolicySpec};
use crate::xds::decode::{decode_resource, DecodeError};
use crate::xds::proto::POLICY_CHAIN_TYPE_URL;
use crate::xds::types::{RoutePolicy, StoredPolicyConfig};

/// Batch-level failures. The kernel is left untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("unexpected resource type '{actual}', expected '{expected}'")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("resource {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: DecodeError,
    },
}

/// A route dropped from an applied batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRoute {
    pub route_key: String,
    pub reason: String,
}

/// What an applied batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub configs: usize,
    pub routes_applied: usize,
    pub routes_skipped: Vec<SkippedRoute>,
}

/// Turns decoded policy configurations into a new routing table.
#[derive(Debug, Clone)]
pub struct ResourceHandler {
    kernel: Arc<Kernel>,
    registry: Arc<PolicyRegistry>,
}

impl ResourceHandler {
    pub fn new(kernel: Arc<Kernel>, registry: Arc<PolicyRegistry>) -> Self {
        Self { kernel, registry }
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Decode, validate, build and apply one batch.
    pub fn handle_resources(
        &self,
        type_url: &str,
        resources: &[Any],
    ) -> Result<ApplySummary, HandlerError> {
        if type_url != POLICY_CHAIN_TYPE_URL {
            return Err(HandlerError::TypeMismatch {
                expected: POLICY_CHAIN_TYPE_URL,
                actual: type_url.to_string(),
            });
        }

        let configs = resources
            .iter()
            .enumerate()
            .map(|(index, resource)| {
                decode_resource(resource).map_err(|source| HandlerError::Decode { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut summary = ApplySummary {
            configs: configs.len(),
            ..Default::default()
        };
        let mut table = RouteTable::new();

        for config in configs {
            self.collect_routes(config, &mut table, &mut summary);
        }

        summary.routes_applied = table.len();
        self.kernel.replace_all(table);

        metrics::record_route_count(summary.routes_applied);
        if !summary.routes_skipped.is_empty() {
            metrics::record_routes_skipped(summary.routes_skipped.len());
        }

        tracing::info!(
            configs = summary.configs,
            routes_applied = summary.routes_applied,
            routes_skipped = summary.routes_skipped.len(),
            "Applied policy configuration"
        );

        Ok(summary)
    }

    fn collect_routes(&self, config: StoredPolicyConfig, table: &mut RouteTable, summary: &mut ApplySummary) {
        let StoredPolicyConfig { id, version, configuration } = config;
        tracing::debug!(
            config_id = %id,
            version,
            api = %configuration.metadata.api_name,
            routes = configuration.routes.len(),
            "Processing policy configuration"
        );

        for raw in configuration.routes {
            let route = match RoutePolicy::from_value(raw) {
                Ok(route) => route,
                Err(e) => {
                    tracing::warn!(route_key = %e.route_key, config_id = %id, error = %e.reason, "Malformed route, skipping");
                    summary.routes_skipped.push(SkippedRoute {
                        route_key: e.route_key.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if let Err(reason) = self.check_route(&route) {
                summary.routes_skipped.push(SkippedRoute {
                    route_key: route.route_key,
                    reason,
                });
                continue;
            }

            let RoutePolicy { route_key, policies } = route;
            let specs: Vec<PolicySpec> = policies.into_iter().map(PolicySpec::from).collect();

            match build_policy_chain(&self.registry, &route_key, specs) {
                Ok(chain) => {
                    if table.insert(route_key.clone(), Arc::new(chain)).is_some() {
                        tracing::warn!(route_key = %route_key, config_id = %id, "Duplicate route key in batch, later definition wins");
                    }
                }
                Err(e) => {
                    tracing::error!(route_key = %route_key, config_id = %id, error = %e, "Failed to build policy chain, skipping route");
                    summary.routes_skipped.push(SkippedRoute {
                        route_key,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Reference checks done before building. Failures isolate the route.
    fn check_route(&self, route: &RoutePolicy) -> Result<(), String> {
        if route.route_key.trim().is_empty() {
            tracing::warn!(policies = route.policies.len(), "Route without a route key, skipping");
            return Err("empty route key".to_string());
        }

        for policy in &route.policies {
            if policy.name.trim().is_empty() || policy.version.trim().is_empty() {
                tracing::warn!(
                    route_key = %route.route_key,
                    policy = %policy.name,
                    policy_version = %policy.version,
                    "Policy reference without name or version, skipping route"
                );
                return Err(format!(
                    "policy reference '{}:{}' needs both a name and a version",
                    policy.name, policy.version
                ));
            }
            if !self.registry.contains(&policy.name, &policy.version) {
                tracing::warn!(
                    route_key = %route.route_key,
                    policy = %policy.name,
                    policy_version = %policy.version,
                    "Policy not registered, skipping route"
                );
                return Err(format!("policy {}:{} not registered", policy.name, policy.version));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Policy, PolicyDefinition, ProcessingMode};
    use crate::xds::decode::encode_resource;
    use serde_json::{json, Value};

    struct Noop;

    impl Policy for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn mode(&self) -> ProcessingMode {
            ProcessingMode::default()
        }
    }

    fn handler() -> ResourceHandler {
        let registry = PolicyRegistry::builder()
            .register(PolicyDefinition::new("noop", "v1"), Arc::new(Noop))
            .unwrap()
            .build();
        ResourceHandler::new(Arc::new(Kernel::new()), Arc::new(registry))
    }

    fn resource(routes: Value) -> Any {
        encode_resource(
            json!({"id": "api", "version": 1, "configuration": {"routes": routes}})
                .as_object()
                .unwrap()
                .clone(),
        )
    }

    #[test]
    fn test_wrong_type_url_rejected() {
        let handler = handler();
        let err = handler
            .handle_resources("type.googleapis.com/envoy.config.route.v3.RouteConfiguration", &[])
            .unwrap_err();
        assert!(matches!(err, HandlerError::TypeMismatch { .. }));
    }

    #[test]
    fn test_empty_route_key_skipped() {
        let handler = handler();
        let summary = handler
            .handle_resources(
                POLICY_CHAIN_TYPE_URL,
                &[resource(json!([
                    {"route_key": "", "policies": [{"name": "noop", "version": "v1"}]},
                    {"route_key": "GET|/a", "policies": [{"name": "noop", "version": "v1"}]}
                ]))],
            )
            .unwrap();
        assert_eq!(summary.routes_applied, 1);
        assert_eq!(summary.routes_skipped[0].reason, "empty route key");
        assert_eq!(handler.kernel().route_keys(), vec!["GET|/a".to_string()]);
    }

    #[test]
    fn test_incomplete_policy_reference_skipped() {
        let handler = handler();
        let summary = handler
            .handle_resources(
                POLICY_CHAIN_TYPE_URL,
                &[resource(json!([
                    {"route_key": "GET|/no-version", "policies": [{"name": "noop"}]},
                    {"route_key": "GET|/no-name", "policies": [{"version": "v1"}]},
                    {"route_key": "GET|/bad-enabled", "policies": [{"name": "noop", "version": "v1", "enabled": "yes"}]},
                    {"route_key": "GET|/ok", "policies": [{"name": "noop", "version": "v1"}]}
                ]))],
            )
            .unwrap();
        let skipped: Vec<_> = summary.routes_skipped.iter().map(|s| s.route_key.as_str()).collect();
        assert_eq!(skipped, vec!["GET|/no-version", "GET|/no-name", "GET|/bad-enabled"]);
        assert!(summary.routes_skipped[2].reason.starts_with("malformed route"));
        assert_eq!(handler.kernel().route_keys(), vec!["GET|/ok".to_string()]);
    }

    #[test]
    fn test_decode_failure_reports_index() {
        let handler = handler();
        let good = resource(json!([]));
        let bad = Any {
            type_url: POLICY_CHAIN_TYPE_URL.to_string(),
            value: vec![0xff],
        };
        let err = handler
            .handle_resources(POLICY_CHAIN_TYPE_URL, &[good, bad])
            .unwrap_err();
        assert!(matches!(err, HandlerError::Decode { index: 1, .. }));
    }
}
