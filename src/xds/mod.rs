//! Configuration discovery subsystem.
//!
//! # Data Flow
//! ```text
//! DiscoveryClient (client.rs)
//!     → transport.rs opens the aggregated stream, sends the subscription
//!     → DiscoveryResponse
//!     → handler.rs: decode.rs (Any → Any → Struct → StoredPolicyConfig)
//!                   → build chains → Kernel::replace_all
//!     → session.rs builds the ACK (applied) or NACK (rejected)
//!     → stream lost: resilience backoff, reconnect
//! ```
//!
//! # Design Decisions
//! - State of the world: every response carries the complete configuration
//! - Envelope decode errors reject a batch; a malformed route or a bad
//!   policy reference only drops that route
//! - The transport is a trait so the protocol loop runs without a network

pub mod client;
pub mod decode;
pub mod handler;
pub mod proto;
pub mod session;
pub mod transport;
pub mod types;

pub use client::{ClientState, DiscoveryClient, DiscoveryError};
pub use decode::{decode_resource, encode_resource, DecodeError};
pub use handler::{ApplySummary, HandlerError, ResourceHandler, SkippedRoute};
pub use proto::{DiscoveryRequest, DiscoveryResponse, Node, Status, POLICY_CHAIN_TYPE_URL};
pub use session::SubscriptionState;
pub use transport::{DiscoveryStream, DiscoveryTransport, GrpcTransport, TransportError};
pub use types::{ConfigMetadata, MalformedRoute, PolicyConfig, PolicyConfiguration, RoutePolicy, StoredPolicyConfig};
