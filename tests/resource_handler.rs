//! Resource handler tests: batch decoding, per-route isolation and what the
//! kernel ends up serving.

use serde_json::json;
use std::sync::Arc;

use policy_engine::kernel::Kernel;
use policy_engine::policy::{BodyMode, RequestContext};
use policy_engine::xds::{DecodeError, HandlerError, ResourceHandler, POLICY_CHAIN_TYPE_URL};

mod common;

use common::{malformed_resource, policy_resource, LogBuffer};

fn handler() -> (ResourceHandler, Arc<Kernel>) {
    let kernel = Arc::new(Kernel::new());
    (ResourceHandler::new(Arc::clone(&kernel), common::registry()), kernel)
}

#[test]
fn test_unknown_policy_isolates_route() {
    let (handler, kernel) = handler();
    let routes = json!([
        {"route_key": "GET|/a", "policies": [{"name": "set-header", "version": "v1", "parameters": {"name": "x-a"}}]},
        {"route_key": "GET|/b", "policies": [
            {"name": "set-header", "version": "v1", "parameters": {"name": "x-b"}},
            {"name": "rate-limit", "version": "v1"}
        ]},
        {"route_key": "GET|/c", "policies": [{"name": "deny", "version": "v2"}]}
    ]);

    let summary = handler
        .handle_resources(POLICY_CHAIN_TYPE_URL, &[policy_resource("api", routes)])
        .unwrap();

    assert_eq!(summary.configs, 1);
    assert_eq!(summary.routes_applied, 1);
    let skipped: Vec<_> = summary.routes_skipped.iter().map(|s| s.route_key.as_str()).collect();
    assert_eq!(skipped, vec!["GET|/b", "GET|/c"]);
    assert!(summary.routes_skipped[0].reason.contains("rate-limit"));
    assert_eq!(kernel.route_keys(), vec!["GET|/a".to_string()]);
}

#[test]
fn test_skipped_route_is_logged() {
    let (handler, kernel) = handler();
    let routes = json!([
        {"route_key": "GET|/a", "policies": [{"name": "deny", "version": "v1"}]},
        {"route_key": "GET|/b", "policies": [{"name": "rate-limit", "version": "v1"}]}
    ]);

    let logs = LogBuffer::default();
    let summary = logs
        .capture(|| handler.handle_resources(POLICY_CHAIN_TYPE_URL, &[policy_resource("api", routes)]))
        .unwrap();

    assert_eq!(summary.routes_applied, 1);
    assert_eq!(kernel.route_keys(), vec!["GET|/a".to_string()]);
    let warnings = logs.lines_with(&["WARN", "route_key=GET|/b", "policy=rate-limit"]);
    assert_eq!(warnings.len(), 1, "captured logs:\n{}", logs.contents());
    assert!(warnings[0].contains("not registered"));
    assert!(logs.lines_with(&["WARN", "route_key=GET|/a"]).is_empty());
}

#[test]
fn test_incomplete_policy_isolates_route() {
    let (handler, kernel) = handler();
    let routes = json!([
        {"route_key": "GET|/ok", "policies": [{"name": "deny", "version": "v1"}]},
        {"route_key": "GET|/bad", "policies": [{"name": "deny"}]},
        {"route_key": "GET|/typed", "policies": [{"name": "deny", "version": "v1", "enabled": "no"}]},
        {"route_key": "GET|/params", "policies": [{"name": "deny", "version": "v1", "parameters": "status=401"}]}
    ]);

    let summary = handler
        .handle_resources(POLICY_CHAIN_TYPE_URL, &[policy_resource("api", routes)])
        .unwrap();

    assert_eq!(summary.routes_applied, 1);
    let skipped: Vec<_> = summary.routes_skipped.iter().map(|s| s.route_key.as_str()).collect();
    assert_eq!(skipped, vec!["GET|/bad", "GET|/typed", "GET|/params"]);
    assert_eq!(kernel.route_keys(), vec!["GET|/ok".to_string()]);
}

#[test]
fn test_invalid_parameters_isolate_route() {
    let (handler, kernel) = handler();
    let routes = json!([
        // Required parameter missing.
        {"route_key": "GET|/missing-param", "policies": [{"name": "set-header", "version": "v1"}]},
        // Rejected by the policy's own validation.
        {"route_key": "POST|/upload", "policies": [{"name": "body-inspect", "version": "v1", "parameters": {"max_bytes": 0}}]},
        // Condition does not parse.
        {"route_key": "GET|/cond", "policies": [{"name": "deny", "version": "v1", "execution_condition": "request.method =="}]},
        {"route_key": "POST|/ok", "policies": [{"name": "body-inspect", "version": "v1", "parameters": {"max_bytes": 1024}}]}
    ]);

    let summary = handler
        .handle_resources(POLICY_CHAIN_TYPE_URL, &[policy_resource("api", routes)])
        .unwrap();

    assert_eq!(summary.routes_applied, 1);
    assert_eq!(summary.routes_skipped.len(), 3);
    assert_eq!(kernel.route_keys(), vec!["POST|/ok".to_string()]);
    assert_eq!(kernel.get_request_body_mode("POST|/ok"), BodyMode::Buffer);
    assert_eq!(kernel.get_response_body_mode("POST|/ok"), BodyMode::Skip);
}

#[test]
fn test_decode_failure_leaves_table_untouched() {
    let (handler, kernel) = handler();
    handler
        .handle_resources(
            POLICY_CHAIN_TYPE_URL,
            &[policy_resource(
                "api",
                json!([{"route_key": "GET|/a", "policies": [{"name": "deny", "version": "v1"}]}]),
            )],
        )
        .unwrap();
    let before = kernel.snapshot();

    let err = handler
        .handle_resources(
            POLICY_CHAIN_TYPE_URL,
            &[
                policy_resource("api", json!([{"route_key": "GET|/b", "policies": []}])),
                malformed_resource(),
            ],
        )
        .unwrap_err();

    assert!(matches!(
        err,
        HandlerError::Decode {
            index: 1,
            source: DecodeError::Envelope(_)
        }
    ));
    assert!(Arc::ptr_eq(&before, &kernel.snapshot()));
}

#[test]
fn test_duplicate_route_key_later_wins() {
    let (handler, kernel) = handler();
    let first = policy_resource(
        "one",
        json!([{"route_key": "GET|/dup", "policies": [{"name": "set-header", "version": "v1", "parameters": {"name": "x-first"}}]}]),
    );
    let second = policy_resource(
        "two",
        json!([{"route_key": "GET|/dup", "policies": [{"name": "deny", "version": "v1"}]}]),
    );

    let summary = handler
        .handle_resources(POLICY_CHAIN_TYPE_URL, &[first, second])
        .unwrap();
    assert_eq!(summary.configs, 2);
    assert_eq!(summary.routes_applied, 1);

    let chain = kernel.get_policy_chain_for_key("GET|/dup").unwrap();
    let names: Vec<_> = chain.policy_keys().into_iter().map(|k| k.name).collect();
    assert_eq!(names, vec!["deny".to_string()]);
}

#[test]
fn test_empty_batch_clears_table() {
    let (handler, kernel) = handler();
    handler
        .handle_resources(
            POLICY_CHAIN_TYPE_URL,
            &[policy_resource(
                "api",
                json!([{"route_key": "GET|/a", "policies": [{"name": "deny", "version": "v1"}]}]),
            )],
        )
        .unwrap();
    assert_eq!(kernel.route_count(), 1);

    let summary = handler.handle_resources(POLICY_CHAIN_TYPE_URL, &[]).unwrap();
    assert_eq!(summary.routes_applied, 0);
    assert_eq!(kernel.route_count(), 0);
}

#[test]
fn test_applied_chain_executes() {
    let (handler, kernel) = handler();
    let routes = json!([{
        "route_key": "GET|/pets",
        "policies": [
            {"name": "set-header", "version": "v1", "parameters": {"name": "x-tenant", "value": "acme"}},
            {"name": "deny", "version": "v1", "executionCondition": "request.headers['x-tenant'] == 'blocked'"},
            {"name": "deny", "version": "v1", "enabled": false}
        ]
    }]);
    handler
        .handle_resources(POLICY_CHAIN_TYPE_URL, &[policy_resource("api", routes)])
        .unwrap();

    let chain = kernel.get_policy_chain_for_key("GET|/pets").unwrap();
    assert_eq!(chain.len(), 2);

    let mut ctx = RequestContext::new("GET|/pets", "GET", "/pets");
    let outcome = chain.execute_request(&mut ctx);
    assert!(!outcome.is_short_circuit());
    assert_eq!(ctx.headers.get("x-tenant"), Some("acme"));
    assert_eq!(kernel.get_request_body_mode("GET|/pets"), BodyMode::Skip);
}
