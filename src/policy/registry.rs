//! Policy registry.
//!
//! # Responsibilities
//! - Map (name, version) to a policy implementation and its definition
//! - Compile each definition's parameter schema once, at registration
//! - Reject duplicate or inconsistent registrations at startup
//!
//! # Design Decisions
//! - Built once through `PolicyRegistryBuilder`, then frozen
//! - Frozen registry needs no locking; shared as `Arc<PolicyRegistry>`
//! - Explicitly constructed and injected, never a process-wide global

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::policy::schema::ParameterSchema;
use crate::policy::types::{PolicyDefinition, PolicyKey};
use crate::policy::Policy;

/// Errors from registry construction and lookup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("policy {0} not found")]
    NotFound(PolicyKey),

    #[error("policy {0} is already registered")]
    Duplicate(PolicyKey),

    #[error("implementation name '{implementation}' does not match definition '{definition}'")]
    NameMismatch {
        definition: String,
        implementation: String,
    },

    #[error("policy {policy} has an invalid parameter schema: {reason}")]
    InvalidSchema { policy: PolicyKey, reason: String },
}

struct RegisteredPolicy {
    definition: Arc<PolicyDefinition>,
    schema: Arc<ParameterSchema>,
    implementation: Arc<dyn Policy>,
}

/// Read-only lookup table of available policies.
#[derive(Default)]
pub struct PolicyRegistry {
    policies: HashMap<PolicyKey, RegisteredPolicy>,
}

impl PolicyRegistry {
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::default()
    }

    /// An empty registry. Every route referencing a policy is rejected.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get_implementation(&self, name: &str, version: &str) -> Result<Arc<dyn Policy>, RegistryError> {
        self.lookup(name, version)
            .map(|p| Arc::clone(&p.implementation))
    }

    pub fn get_definition(&self, name: &str, version: &str) -> Result<Arc<PolicyDefinition>, RegistryError> {
        self.lookup(name, version).map(|p| Arc::clone(&p.definition))
    }

    /// Compiled validators for the definition's parameters.
    pub fn get_parameter_schema(&self, name: &str, version: &str) -> Result<Arc<ParameterSchema>, RegistryError> {
        self.lookup(name, version).map(|p| Arc::clone(&p.schema))
    }

    pub fn contains(&self, name: &str, version: &str) -> bool {
        self.lookup(name, version).is_ok()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> Vec<PolicyKey> {
        let mut keys: Vec<_> = self.policies.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lookup(&self, name: &str, version: &str) -> Result<&RegisteredPolicy, RegistryError> {
        let key = PolicyKey::new(name, version);
        match self.policies.get(&key) {
            Some(policy) => Ok(policy),
            None => Err(RegistryError::NotFound(key)),
        }
    }
}

impl std::fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("policies", &self.keys())
            .finish()
    }
}

/// Collects registrations before freezing them into a `PolicyRegistry`.
#[derive(Default)]
pub struct PolicyRegistryBuilder {
    policies: HashMap<PolicyKey, RegisteredPolicy>,
}

impl PolicyRegistryBuilder {
    /// Register an implementation under its definition's name and version.
    pub fn register(
        mut self,
        definition: PolicyDefinition,
        implementation: Arc<dyn Policy>,
    ) -> Result<Self, RegistryError> {
        if implementation.name() != definition.name {
            return Err(RegistryError::NameMismatch {
                definition: definition.name,
                implementation: implementation.name().to_string(),
            });
        }
        let key = definition.key();
        if self.policies.contains_key(&key) {
            return Err(RegistryError::Duplicate(key));
        }
        let schema = ParameterSchema::compile(&definition).map_err(|e| RegistryError::InvalidSchema {
            policy: key.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!(policy = %key, parameters = schema.len(), "Registered policy");
        self.policies.insert(
            key,
            RegisteredPolicy {
                definition: Arc::new(definition),
                schema: Arc::new(schema),
                implementation,
            },
        );
        Ok(self)
    }

    pub fn build(self) -> PolicyRegistry {
        tracing::info!(policies = self.policies.len(), "Policy registry initialized");
        PolicyRegistry {
            policies: self.policies,
        }
    }
}
