//! Policy engine core for an API gateway.
//!
//! Keeps a per-route table of compiled policy chains, fed over a
//! configuration-discovery stream, and answers "which chain, which body
//! mode" for every request.

pub mod config;
pub mod kernel;
pub mod lifecycle;
pub mod observability;
pub mod policy;
pub mod resilience;
pub mod xds;

pub use config::EngineConfig;
pub use kernel::Kernel;
pub use lifecycle::{Engine, Shutdown};
pub use policy::{Policy, PolicyChain, PolicyRegistry};
pub use xds::{DiscoveryClient, ResourceHandler};
