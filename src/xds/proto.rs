//! Discovery protocol messages.
//!
//! Field numbers follow `envoy.service.discovery.v3` so the client talks to
//! any ADS-compatible control plane. Only the fields the engine uses are
//! declared; unknown fields are skipped by the decoder.

use prost_types::Any;

/// gRPC method path of the aggregated discovery stream.
pub const ADS_METHOD_PATH: &str =
    "/envoy.service.discovery.v3.AggregatedDiscoveryService/StreamAggregatedResources";

/// Resource type carrying per-route policy chain configuration.
pub const POLICY_CHAIN_TYPE_URL: &str = "type.googleapis.com/policyengine.v1.PolicyChainConfig";

/// `google.rpc.Code.INVALID_ARGUMENT`, reported on NACK.
pub const CODE_INVALID_ARGUMENT: i32 = 3;

/// Identity of the client.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Node {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub cluster: String,
    #[prost(string, tag = "6")]
    pub user_agent_name: String,
}

/// `google.rpc.Status`, attached to a NACK.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Status {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DiscoveryRequest {
    #[prost(string, tag = "1")]
    pub version_info: String,
    #[prost(message, optional, tag = "2")]
    pub node: Option<Node>,
    #[prost(string, repeated, tag = "3")]
    pub resource_names: Vec<String>,
    #[prost(string, tag = "4")]
    pub type_url: String,
    #[prost(string, tag = "5")]
    pub response_nonce: String,
    #[prost(message, optional, tag = "6")]
    pub error_detail: Option<Status>,
}

impl DiscoveryRequest {
    /// A NACK carries an error detail; an ACK or subscription does not.
    pub fn is_nack(&self) -> bool {
        self.error_detail.is_some()
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DiscoveryResponse {
    #[prost(string, tag = "1")]
    pub version_info: String,
    #[prost(message, repeated, tag = "2")]
    pub resources: Vec<Any>,
    #[prost(string, tag = "4")]
    pub type_url: String,
    #[prost(string, tag = "5")]
    pub nonce: String,
}
