//! Version and nonce bookkeeping for one subscription.
//!
//! # Responsibilities
//! - Build the initial subscription request for each stream
//! - Build ACKs (adopt the response's version and nonce)
//! - Build NACKs (keep the last accepted version, echo the new nonce)
//!
//! # Design Decisions
//! - The accepted version survives reconnects so the server can skip an
//!   unchanged snapshot; the nonce belongs to a single stream and is cleared on reconnect

use crate::xds::proto::{DiscoveryRequest, Node, Status, CODE_INVALID_ARGUMENT};

const USER_AGENT: &str = "policy-engine";

#[derive(Debug, Clone)]
pub struct SubscriptionState {
    node: Node,
    type_url: String,
    version_info: String,
    nonce: String,
}

impl SubscriptionState {
    pub fn new(node_id: impl Into<String>, cluster: impl Into<String>, type_url: impl Into<String>) -> Self {
        Self {
            node: Node {
                id: node_id.into(),
                cluster: cluster.into(),
                user_agent_name: USER_AGENT.to_string(),
            },
            type_url: type_url.into(),
            version_info: String::new(),
            nonce: String::new(),
        }
    }

    /// Last version the engine applied. Empty until the first ACK.
    pub fn version_info(&self) -> &str {
        &self.version_info
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn type_url(&self) -> &str {
        &self.type_url
    }

    /// Forget the stream-scoped nonce. Call before opening a new stream.
    pub fn reset_stream(&mut self) {
        self.nonce.clear();
    }

    /// First request on a stream: subscribe with the last accepted version.
    pub fn initial_request(&self) -> DiscoveryRequest {
        self.request(None)
    }

    /// Record a successfully applied response and build its ACK.
    pub fn accept(&mut self, version_info: &str, nonce: &str) -> DiscoveryRequest {
        self.version_info = version_info.to_string();
        self.nonce = nonce.to_string();
        self.request(None)
    }

    /// Build the NACK for a rejected response. Only applied batches change
    /// the recorded version and nonce; the NACK just echoes `nonce`.
    pub fn reject(&self, nonce: &str, message: impl Into<String>) -> DiscoveryRequest {
        self.request_with_nonce(
            nonce,
            Some(Status {
                code: CODE_INVALID_ARGUMENT,
                message: message.into(),
            }),
        )
    }

    fn request(&self, error_detail: Option<Status>) -> DiscoveryRequest {
        self.request_with_nonce(&self.nonce, error_detail)
    }

    fn request_with_nonce(&self, nonce: &str, error_detail: Option<Status>) -> DiscoveryRequest {
        DiscoveryRequest {
            version_info: self.version_info.clone(),
            node: Some(self.node.clone()),
            resource_names: Vec::new(),
            type_url: self.type_url.clone(),
            response_nonce: nonce.to_string(),
            error_detail,
        }
    }
}
