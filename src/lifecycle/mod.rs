//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     EngineConfig + PolicyRegistry → Kernel → ResourceHandler → DiscoveryClient::start
//!
//! Shutdown (shutdown.rs):
//!     trigger → every listener wakes (backoff waits, stream receives) → loop exits
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Engine::shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: registry first, then kernel, then discovery
//! - Shutdown is a broadcast flag, so listeners created late still see it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownListener};
pub use signals::wait_for_signal;
pub use startup::{Engine, StartupError};
