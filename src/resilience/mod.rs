//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Discovery stream fails:
//!     → backoff.rs (compute min(initial × 2^attempt, max), wait)
//!     → wait interrupted by shutdown, or elapses and the client reconnects
//!     → successful connect resets the attempt counter
//! ```
//!
//! # Design Decisions
//! - The delay calculation is a pure function, tested on its own
//! - Waiting is always cancellable; shutdown never sits out a long backoff
//! - Jitter is opt-in so delay sequences stay predictable by default

pub mod backoff;

pub use backoff::{calculate_backoff, ReconnectManager};
