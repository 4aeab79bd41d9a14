//! Policy subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     PolicyDefinition + impl Policy
//!     → registry.rs (register once, keyed by name + version;
//!                    schema.rs compiles the parameter validators)
//!     → PolicyRegistry (read-only, shared via Arc)
//!
//! Configuration update:
//!     PolicySpec[] for a route
//!     → chain.rs (resolve, validate params, compile conditions)
//!     → PolicyChain (immutable, body requirements precomputed)
//!
//! Per request:
//!     PolicyChain + RequestContext / ResponseContext
//!     → executor.rs (ordered execution, conditions, short-circuit)
//! ```
//!
//! # Design Decisions
//! - Dispatch is a trait-object table lookup, not reflection
//! - Parameter validation runs at configuration time, never per request
//! - Chains are rebuilt on every update; nothing is mutated in place

pub mod chain;
pub mod condition;
pub mod context;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod types;

pub use chain::{build_policy_chain, ChainBuildError, ChainEntry, PolicyChain};
pub use condition::{Condition, ConditionError};
pub use context::{
    Headers, ImmediateResponse, RequestAction, RequestContext, RequestMutation, ResponseAction,
    ResponseContext, ResponseMutation,
};
pub use executor::{RequestOutcome, ResponseOutcome};
pub use registry::{PolicyRegistry, PolicyRegistryBuilder, RegistryError};
pub use schema::{ParameterSchema, SchemaError};
pub use types::{
    BodyMode, ParameterDefinition, ParameterType, Parameters, PhaseMode, PolicyDefinition,
    PolicyError, PolicyKey, PolicySpec, ProcessingMode,
};

/// Capability interface every policy implements.
///
/// Implementations are registered once at startup and shared across all
/// routes and requests, so they must not keep per-request state.
pub trait Policy: Send + Sync {
    /// Name matching the policy's definition.
    fn name(&self) -> &str;

    /// Phases this policy participates in. Drives body buffering decisions.
    fn mode(&self) -> ProcessingMode;

    /// Validate route-level parameters. Called at configuration time.
    fn validate(&self, _params: &Parameters) -> Result<(), PolicyError> {
        Ok(())
    }

    fn on_request(&self, _ctx: &RequestContext, _params: &Parameters) -> RequestAction {
        RequestAction::Continue
    }

    fn on_response(&self, _ctx: &ResponseContext, _params: &Parameters) -> ResponseAction {
        ResponseAction::Continue
    }
}
