//! Policy configuration documents delivered through discovery.
//!
//! These are transient: decoded once per batch, converted into
//! `PolicyChain`s and dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::policy::{Parameters, PolicySpec};

/// One stored configuration, usually one API with all of its routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPolicyConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub version: i64,
    pub configuration: PolicyConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfiguration {
    /// Kept as raw JSON so a malformed route only costs that route.
    /// Parse each entry with [`RoutePolicy::from_value`].
    #[serde(default)]
    pub routes: Vec<Value>,
    #[serde(default)]
    pub metadata: ConfigMetadata,
}

/// Descriptive fields used in log output only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigMetadata {
    #[serde(alias = "apiName")]
    pub api_name: String,
    #[serde(alias = "apiVersion")]
    pub api_version: String,
    pub context: String,
}

/// Policies attached to one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePolicy {
    /// Missing keys are reported per route rather than failing the document.
    #[serde(default, alias = "routeKey")]
    pub route_key: String,
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

impl RoutePolicy {
    /// Parse one route entry. The error keeps whatever route key could be
    /// read so the skip can be reported against it.
    pub fn from_value(value: Value) -> Result<Self, MalformedRoute> {
        let route_key = value
            .get("route_key")
            .or_else(|| value.get("routeKey"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        serde_json::from_value(value).map_err(|e| MalformedRoute {
            route_key,
            reason: e.to_string(),
        })
    }
}

/// A route entry that does not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed route: {reason}")]
pub struct MalformedRoute {
    pub route_key: String,
    pub reason: String,
}

/// A single policy reference in wire form.
///
/// Empty `name` or `version` decode fine and are rejected when the route is
/// checked against the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, alias = "executionCondition")]
    pub execution_condition: Option<String>,
    #[serde(default, alias = "params")]
    pub parameters: Parameters,
}

fn default_enabled() -> bool {
    true
}

impl From<PolicyConfig> for PolicySpec {
    fn from(config: PolicyConfig) -> Self {
        PolicySpec {
            name: config.name,
            version: config.version,
            enabled: config.enabled,
            execution_condition: config.execution_condition,
            parameters: config.parameters,
        }
    }
}
