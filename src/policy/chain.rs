//! Policy chain construction.
//!
//! # Responsibilities
//! - Resolve each `PolicySpec` of a route against the registry
//! - Validate parameters (schema, then the policy's own check)
//! - Compile execution conditions
//! - Precompute whether the route needs request/response bodies
//!
//! # Design Decisions
//! - First failure aborts the whole chain; the caller decides what to drop
//! - Disabled specs are resolved and validated but not compiled in
//! - Body requirements are computed once per route, not per request

use std::sync::Arc;
use thiserror::Error;

use crate::policy::condition::{Condition, ConditionError};
use crate::policy::registry::{PolicyRegistry, RegistryError};
use crate::policy::types::{BodyMode, Parameters, PolicyError, PolicyKey, PolicySpec, ProcessingMode};
use crate::policy::Policy;

/// Errors from building a single route's chain.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainBuildError {
    #[error("route {route_key}: {source}")]
    PolicyNotFound {
        route_key: String,
        #[source]
        source: RegistryError,
    },

    #[error("route {route_key}: policy {policy} rejected parameters: {source}")]
    InvalidParameters {
        route_key: String,
        policy: PolicyKey,
        #[source]
        source: PolicyError,
    },

    #[error("route {route_key}: policy {policy} has invalid execution condition: {source}")]
    InvalidCondition {
        route_key: String,
        policy: PolicyKey,
        #[source]
        source: ConditionError,
    },
}

/// One compiled policy in a chain.
pub struct ChainEntry {
    pub spec: PolicySpec,
    /// Spec parameters with schema defaults merged.
    pub parameters: Parameters,
    pub policy: Arc<dyn Policy>,
    pub mode: ProcessingMode,
    pub condition: Option<Condition>,
}

impl ChainEntry {
    pub fn key(&self) -> PolicyKey {
        self.spec.key()
    }
}

impl std::fmt::Debug for ChainEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainEntry")
            .field("policy", &self.key().to_string())
            .field("mode", &self.mode)
            .field("condition", &self.condition.as_ref().map(Condition::source))
            .finish()
    }
}

/// Immutable, ordered set of policies for one route.
#[derive(Debug)]
pub struct PolicyChain {
    route_key: String,
    entries: Vec<ChainEntry>,
    requires_request_body: bool,
    requires_response_body: bool,
}

impl PolicyChain {
    pub(crate) fn from_entries(route_key: String, entries: Vec<ChainEntry>) -> Self {
        let requires_request_body = entries.iter().any(|e| e.mode.request_body.needs_body());
        let requires_response_body = entries.iter().any(|e| e.mode.response_body.needs_body());
        Self {
            route_key,
            entries,
            requires_request_body,
            requires_response_body,
        }
    }

    pub fn route_key(&self) -> &str {
        &self.route_key
    }

    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn requires_request_body(&self) -> bool {
        self.requires_request_body
    }

    pub fn requires_response_body(&self) -> bool {
        self.requires_response_body
    }

    pub fn request_body_mode(&self) -> BodyMode {
        BodyMode::from(self.requires_request_body)
    }

    pub fn response_body_mode(&self) -> BodyMode {
        BodyMode::from(self.requires_response_body)
    }

    /// Policy keys in execution order.
    pub fn policy_keys(&self) -> Vec<PolicyKey> {
        self.entries.iter().map(ChainEntry::key).collect()
    }
}

/// Build the chain for `route_key` from `specs`, in order.
pub fn build_policy_chain(
    registry: &PolicyRegistry,
    route_key: &str,
    specs: Vec<PolicySpec>,
) -> Result<PolicyChain, ChainBuildError> {
    let mut entries = Vec::with_capacity(specs.len());

    for spec in specs {
        let not_found = |source| ChainBuildError::PolicyNotFound {
            route_key: route_key.to_string(),
            source,
        };
        let policy = registry
            .get_implementation(&spec.name, &spec.version)
            .map_err(not_found)?;
        let schema = registry
            .get_parameter_schema(&spec.name, &spec.version)
            .map_err(not_found)?;

        let invalid_params = |source| ChainBuildError::InvalidParameters {
            route_key: route_key.to_string(),
            policy: spec.key(),
            source,
        };
        let parameters = schema.resolve(&spec.parameters).map_err(invalid_params)?;
        policy.validate(&parameters).map_err(invalid_params)?;

        let condition = match spec.execution_condition.as_deref().map(str::trim) {
            Some(source) if !source.is_empty() => Some(Condition::parse(source).map_err(|source| {
                ChainBuildError::InvalidCondition {
                    route_key: route_key.to_string(),
                    policy: spec.key(),
                    source,
                }
            })?),
            _ => None,
        };

        if !spec.enabled {
            tracing::debug!(route_key = %route_key, policy = %spec.key(), "Policy disabled, not compiled into chain");
            continue;
        }

        let mode = policy.mode();
        entries.push(ChainEntry {
            spec,
            parameters,
            policy,
            mode,
            condition,
        });
    }

    Ok(PolicyChain::from_entries(route_key.to_string(), entries))
}
