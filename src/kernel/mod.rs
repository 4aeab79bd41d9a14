//! Kernel subsystem: the live routing table.
//!
//! # Data Flow
//! ```text
//! Discovery update:
//!     ResourceHandler builds RouteTable off to the side
//!     → table.rs replace_all (single atomic pointer swap)
//!
//! Per request (external interception server):
//!     route key
//!     → get_policy_chain_for_key / get_*_body_mode
//!     → Arc<PolicyChain> held for the life of the request
//! ```
//!
//! # Design Decisions
//! - Read-mostly: lookups never block each other or writers
//! - State of the world: the table is replaced, never patched, by discovery

pub mod table;

pub use table::{Kernel, RouteTable};
