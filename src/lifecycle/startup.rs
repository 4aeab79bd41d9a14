//! Startup orchestration.
//!
//! # Responsibilities
//! - Wire the kernel, resource handler and discovery client together
//! - Start the discovery loop
//! - Stop it again on shutdown
//!
//! # Design Decisions
//! - Fail fast: an invalid discovery configuration is a startup error
//! - The policy registry is built by the caller and injected; the engine
//!   never adds policies
//! - With discovery disabled the engine serves an empty routing table

use std::sync::Arc;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::kernel::Kernel;
use crate::policy::PolicyRegistry;
use crate::xds::{DiscoveryClient, DiscoveryError, DiscoveryTransport, GrpcTransport, ResourceHandler};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("discovery client: {0}")]
    Discovery(#[from] DiscoveryError),
}

/// A running policy engine.
#[derive(Debug)]
pub struct Engine {
    kernel: Arc<Kernel>,
    registry: Arc<PolicyRegistry>,
    discovery: Option<DiscoveryClient>,
}

impl Engine {
    /// Start with the gRPC discovery transport. Must run inside a Tokio runtime.
    pub fn start(config: EngineConfig, registry: Arc<PolicyRegistry>) -> Result<Self, StartupError> {
        let transport = Arc::new(GrpcTransport::new(&config.discovery));
        Self::start_with_transport(config, registry, transport)
    }

    /// Start with a caller-supplied transport.
    pub fn start_with_transport(
        config: EngineConfig,
        registry: Arc<PolicyRegistry>,
        transport: Arc<dyn DiscoveryTransport>,
    ) -> Result<Self, StartupError> {
        let kernel = Arc::new(Kernel::new());

        tracing::info!(policies = registry.len(), "Policy registry loaded");

        let discovery = if config.discovery.enabled {
            let handler = ResourceHandler::new(Arc::clone(&kernel), Arc::clone(&registry));
            let client = DiscoveryClient::new(config.discovery, transport, handler)?;
            client.start()?;
            Some(client)
        } else {
            tracing::warn!("Discovery disabled, routing table stays empty");
            None
        };

        Ok(Self {
            kernel,
            registry,
            discovery,
        })
    }

    /// Routing table for the request path.
    pub fn kernel(&self) -> Arc<Kernel> {
        Arc::clone(&self.kernel)
    }

    pub fn registry(&self) -> &Arc<PolicyRegistry> {
        &self.registry
    }

    pub fn discovery(&self) -> Option<&DiscoveryClient> {
        self.discovery.as_ref()
    }

    /// Stop discovery and wait for it to finish.
    pub async fn shutdown(&self) {
        if let Some(client) = &self.discovery {
            client.stop();
            client.wait().await;
        }
        tracing::info!(routes = self.kernel.route_count(), "Engine stopped");
    }
}
