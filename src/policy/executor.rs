//! Chain execution.
//!
//! # Responsibilities
//! - Run a chain's request phase in order and its response phase in reverse
//! - Skip entries whose mode excludes the phase or whose condition is false
//! - Apply mutations so later policies observe them
//! - Stop the request phase at the first immediate response
//!
//! # Design Decisions
//! - Execution borrows the chain immutably; a concurrent table swap cannot
//!   change a chain mid-request
//! - Outcomes record which policies ran, for logging by the caller

use crate::observability::metrics;
use crate::policy::chain::{ChainEntry, PolicyChain};
use crate::policy::context::{
    ConditionContext, ImmediateResponse, RequestAction, RequestContext, ResponseAction, ResponseContext,
};
use crate::policy::types::PolicyKey;

/// Result of running the request phase.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestOutcome {
    /// Policies that ran, in order.
    pub executed: Vec<PolicyKey>,
    /// Policies skipped by mode or condition.
    pub skipped: Vec<PolicyKey>,
    /// Set when a policy ended the chain early.
    pub immediate_response: Option<(PolicyKey, ImmediateResponse)>,
}

impl RequestOutcome {
    pub fn is_short_circuit(&self) -> bool {
        self.immediate_response.is_some()
    }
}

/// Result of running the response phase.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseOutcome {
    pub executed: Vec<PolicyKey>,
    pub skipped: Vec<PolicyKey>,
}

fn condition_allows(entry: &ChainEntry, ctx: &dyn ConditionContext) -> bool {
    entry
        .condition
        .as_ref()
        .map_or(true, |condition| condition.evaluate(ctx))
}

impl PolicyChain {
    /// Run the request phase against `ctx`, mutating it in place.
    pub fn execute_request(&self, ctx: &mut RequestContext) -> RequestOutcome {
        let mut outcome = RequestOutcome::default();

        for entry in self.entries() {
            if !entry.mode.handles_request() || !condition_allows(entry, &*ctx) {
                outcome.skipped.push(entry.key());
                continue;
            }

            outcome.executed.push(entry.key());
            match entry.policy.on_request(ctx, &entry.parameters) {
                RequestAction::Continue => {}
                RequestAction::Mutate(mutation) => mutation.apply(ctx),
                RequestAction::ImmediateResponse(response) => {
                    tracing::debug!(
                        route_key = %self.route_key(),
                        policy = %entry.key(),
                        status = response.status,
                        "Policy short-circuited request"
                    );
                    metrics::record_short_circuit(&entry.spec.name);
                    outcome.immediate_response = Some((entry.key(), response));
                    return outcome;
                }
            }
        }
        outcome
    }

    /// Run the response phase against `ctx` in reverse chain order.
    pub fn execute_response(&self, ctx: &mut ResponseContext) -> ResponseOutcome {
        let mut outcome = ResponseOutcome::default();

        for entry in self.entries().iter().rev() {
            if !entry.mode.handles_response() || !condition_allows(entry, &*ctx) {
                outcome.skipped.push(entry.key());
                continue;
            }

            outcome.executed.push(entry.key());
            match entry.policy.on_response(ctx, &entry.parameters) {
                ResponseAction::Continue => {}
                ResponseAction::Mutate(mutation) => mutation.apply(ctx),
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::chain::build_policy_chain;
    use crate::policy::context::{RequestMutation, ResponseMutation};
    use crate::policy::registry::PolicyRegistry;
    use crate::policy::types::{Parameters, PhaseMode, PolicyDefinition, PolicySpec, ProcessingMode};
    use crate::policy::Policy;
    use std::sync::Arc;

    /// Appends its name to the `x-trace` header on both paths.
    struct Tracer(&'static str);

    impl Policy for Tracer {
        fn name(&self) -> &str {
            self.0
        }

        fn mode(&self) -> ProcessingMode {
            ProcessingMode::headers()
        }

        fn on_request(&self, ctx: &RequestContext, _params: &Parameters) -> RequestAction {
            let trace = match ctx.headers.get("x-trace") {
                Some(prev) => format!("{},{}", prev, self.0),
                None => self.0.to_string(),
            };
            RequestAction::Mutate(RequestMutation::default().set_header("x-trace", trace))
        }

        fn on_response(&self, ctx: &ResponseContext, _params: &Parameters) -> ResponseAction {
            let trace = match ctx.headers.get("x-trace") {
                Some(prev) => format!("{},{}", prev, self.0),
                None => self.0.to_string(),
            };
            ResponseAction::Mutate(ResponseMutation::default().set_header("x-trace", trace))
        }
    }

    /// Rejects requests without an api key.
    struct ApiKey;

    impl Policy for ApiKey {
        fn name(&self) -> &str {
            "api-key"
        }

        fn mode(&self) -> ProcessingMode {
            ProcessingMode::request_headers()
        }

        fn on_request(&self, ctx: &RequestContext, _params: &Parameters) -> RequestAction {
            if ctx.headers.contains("x-api-key") {
                RequestAction::Continue
            } else {
                RequestAction::ImmediateResponse(ImmediateResponse::new(401, "missing api key"))
            }
        }
    }

    /// Response-only policy.
    struct Cache;

    impl Policy for Cache {
        fn name(&self) -> &str {
            "cache"
        }

        fn mode(&self) -> ProcessingMode {
            ProcessingMode {
                response_header: PhaseMode::Process,
                ..Default::default()
            }
        }

        fn on_response(&self, _ctx: &ResponseContext, _params: &Parameters) -> ResponseAction {
            ResponseAction::Mutate(ResponseMutation::default().set_header("cache-control", "max-age=60"))
        }
    }

    fn registry() -> PolicyRegistry {
        PolicyRegistry::builder()
            .register(PolicyDefinition::new("a", "v1"), Arc::new(Tracer("a")))
            .unwrap()
            .register(PolicyDefinition::new("b", "v1"), Arc::new(Tracer("b")))
            .unwrap()
            .register(PolicyDefinition::new("c", "v1"), Arc::new(Tracer("c")))
            .unwrap()
            .register(PolicyDefinition::new("api-key", "v1"), Arc::new(ApiKey))
            .unwrap()
            .register(PolicyDefinition::new("cache", "v1"), Arc::new(Cache))
            .unwrap()
            .build()
    }

    fn chain(specs: Vec<PolicySpec>) -> PolicyChain {
        build_policy_chain(&registry(), "GET|/pets", specs).unwrap()
    }

    #[test]
    fn test_request_runs_in_order_and_sees_mutations() {
        let chain = chain(vec![
            PolicySpec::new("a", "v1"),
            PolicySpec::new("b", "v1"),
            PolicySpec::new("c", "v1"),
        ]);
        let mut ctx = RequestContext::new("GET|/pets", "GET", "/pets");

        let outcome = chain.execute_request(&mut ctx);
        assert_eq!(ctx.headers.get("x-trace"), Some("a,b,c"));
        assert_eq!(outcome.executed.len(), 3);
        assert!(!outcome.is_short_circuit());
    }

    #[test]
    fn test_response_runs_in_reverse() {
        let chain = chain(vec![
            PolicySpec::new("a", "v1"),
            PolicySpec::new("b", "v1"),
            PolicySpec::new("c", "v1"),
        ]);
        let mut ctx = ResponseContext::new(RequestContext::new("GET|/pets", "GET", "/pets"), 200);

        chain.execute_response(&mut ctx);
        assert_eq!(ctx.headers.get("x-trace"), Some("c,b,a"));
    }

    #[test]
    fn test_short_circuit_stops_chain() {
        let chain = chain(vec![
            PolicySpec::new("a", "v1"),
            PolicySpec::new("api-key", "v1"),
            PolicySpec::new("b", "v1"),
        ]);
        let mut ctx = RequestContext::new("GET|/pets", "GET", "/pets");

        let outcome = chain.execute_request(&mut ctx);
        let (policy, response) = outcome.immediate_response.unwrap();
        assert_eq!(policy.name, "api-key");
        assert_eq!(response.status, 401);
        // "b" never ran.
        assert_eq!(ctx.headers.get("x-trace"), Some("a"));
        assert_eq!(outcome.executed.len(), 2);
    }

    #[test]
    fn test_condition_skips_policy() {
        let chain = chain(vec![
            PolicySpec::new("api-key", "v1").with_condition("request.method != 'OPTIONS'"),
            PolicySpec::new("a", "v1"),
        ]);

        let mut preflight = RequestContext::new("GET|/pets", "OPTIONS", "/pets");
        let outcome = chain.execute_request(&mut preflight);
        assert!(!outcome.is_short_circuit());
        assert_eq!(outcome.skipped, vec![PolicyKey::new("api-key", "v1")]);

        let mut get = RequestContext::new("GET|/pets", "GET", "/pets");
        assert!(chain.execute_request(&mut get).is_short_circuit());
    }

    #[test]
    fn test_mode_excludes_phase() {
        let chain = chain(vec![PolicySpec::new("cache", "v1"), PolicySpec::new("api-key", "v1")]);

        let mut request = RequestContext::new("GET|/pets", "GET", "/pets").with_header("x-api-key", "k");
        let outcome = chain.execute_request(&mut request);
        assert_eq!(outcome.skipped, vec![PolicyKey::new("cache", "v1")]);

        let mut response = ResponseContext::new(request, 200);
        let outcome = chain.execute_response(&mut response);
        assert_eq!(outcome.executed, vec![PolicyKey::new("cache", "v1")]);
        assert_eq!(outcome.skipped, vec![PolicyKey::new("api-key", "v1")]);
        assert_eq!(response.headers.get("cache-control"), Some("max-age=60"));
    }

    #[test]
    fn test_response_condition_uses_status() {
        let chain = chain(vec![PolicySpec::new("cache", "v1").with_condition("response.status == 200")]);

        let mut ok = ResponseContext::new(RequestContext::new("r", "GET", "/"), 200);
        chain.execute_response(&mut ok);
        assert!(ok.headers.contains("cache-control"));

        let mut failed = ResponseContext::new(RequestContext::new("r", "GET", "/"), 500);
        chain.execute_response(&mut failed);
        assert!(!failed.headers.contains("cache-control"));
    }
}
