//! Route-key → policy-chain table.
//!
//! # Responsibilities
//! - Store compiled chains by route key
//! - Serve lookups on the request hot path
//! - Replace the whole table atomically for discovery updates
//!
//! # Design Decisions
//! - Immutable snapshots published through `ArcSwap` (readers never lock)
//! - Chains are handed out as `Arc`, so a request keeps its chain even if
//!   the table is swapped underneath it
//! - Absent route is `None`, not an error

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::observability::metrics;
use crate::policy::{BodyMode, PolicyChain};

/// One immutable version of the routing table.
pub type RouteTable = HashMap<String, Arc<PolicyChain>>;

/// Owns the routing table.
#[derive(Debug, Default)]
pub struct Kernel {
    routes: ArcSwap<RouteTable>,
}

impl Kernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a single route. Used by non-discovery configuration paths.
    pub fn register_route(&self, route_key: impl Into<String>, chain: PolicyChain) {
        let route_key = route_key.into();
        let chain = Arc::new(chain);
        let previous = self.routes.rcu(|current| {
            let mut next = RouteTable::clone(current);
            next.insert(route_key.clone(), Arc::clone(&chain));
            next
        });
        let count = previous.len() + usize::from(!previous.contains_key(&route_key));
        tracing::debug!(route_key = %route_key, policies = chain.len(), "Registered route");
        metrics::record_route_count(count);
    }

    /// Remove a single route, returning its chain if it existed.
    pub fn unregister_route(&self, route_key: &str) -> Option<Arc<PolicyChain>> {
        let previous = self.routes.rcu(|current| {
            let mut next = RouteTable::clone(current);
            next.remove(route_key);
            next
        });
        let removed = previous.get(route_key).cloned();
        if removed.is_some() {
            tracing::debug!(route_key = %route_key, "Unregistered route");
            metrics::record_route_count(previous.len() - 1);
        }
        removed
    }

    /// Publish `table` as the new routing table in one step.
    pub fn replace_all(&self, table: RouteTable) {
        let count = table.len();
        self.routes.store(Arc::new(table));
        metrics::record_route_count(count);
    }

    /// Look up the chain for a route. Hot path.
    pub fn get_policy_chain_for_key(&self, route_key: &str) -> Option<Arc<PolicyChain>> {
        self.routes.load().get(route_key).cloned()
    }

    /// Request body handling for a route; `Skip` for unknown routes.
    pub fn get_request_body_mode(&self, route_key: &str) -> BodyMode {
        self.routes
            .load()
            .get(route_key)
            .map_or(BodyMode::Skip, |chain| chain.request_body_mode())
    }

    /// Response body handling for a route; `Skip` for unknown routes.
    pub fn get_response_body_mode(&self, route_key: &str) -> BodyMode {
        self.routes
            .load()
            .get(route_key)
            .map_or(BodyMode::Skip, |chain| chain.response_body_mode())
    }

    /// The current table as a consistent snapshot.
    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.routes.load_full()
    }

    pub fn route_count(&self) -> usize {
        self.routes.load().len()
    }

    /// Route keys in sorted order.
    pub fn route_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.routes.load().keys().cloned().collect();
        keys.sort();
        keys
    }
}
