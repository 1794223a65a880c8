use policy::{BundleManifest, Engine, EvalLimits};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use warden_core::input::{
    Action, AuthorizationInput, Environment, Principal, RequestContext, Resource, ResourceKind,
    Role, Sensitivity,
};

const MODULE: &str = r#"
package mcp.authz

default allow = false

allow {
    input.action == "tool:invoke"
    some team in input.principal.teams
    team in input.resource.team_owners
}

deny[{"rule_id": "prod_guard", "message": "production tools need a lead"}] {
    input.resource.environment == "production"
    input.principal.role != "lead"
}

obligations["redact_secrets"] {
    contains(input.resource.name, "secret")
}
"#;

fn fixed_input() -> AuthorizationInput {
    AuthorizationInput {
        principal: Principal {
            id: "u-7".into(),
            display_name: "Eval Seven".into(),
            role: Role::Developer,
            teams: BTreeSet::from(["team-a".to_string(), "team-b".to_string()]),
            attributes: BTreeMap::from([("region".to_string(), json!("eu"))]),
            mfa_verified: true,
        },
        action: Action::ToolInvoke,
        resource: Resource {
            kind: ResourceKind::Tool,
            id: "t-9".into(),
            name: "read_secret_note".into(),
            description: Some("reads a note".into()),
            sensitivity: Sensitivity::Medium,
            tags: BTreeSet::new(),
            owner: None,
            team_owners: BTreeSet::from(["team-b".to_string()]),
            environment: Environment::Staging,
        },
        parameters: BTreeMap::from([
            ("note_id".to_string(), json!("n-1")),
            ("verbose".to_string(), json!(true)),
        ]),
        context: RequestContext {
            // Fixed timestamp: time builtins must be input-driven.
            timestamp: "2026-03-02T09:15:00Z".parse().unwrap(),
            client_ip: None,
            session_id: None,
            request_id: "req-1".into(),
            geo_country: Some("DE".into()),
        },
        policy_version: "v1".into(),
    }
}

fn engine() -> Engine {
    let engine = Engine::new(EvalLimits::default());
    engine
        .load(BundleManifest {
            version: "v1".into(),
            compiled_at: chrono::Utc::now(),
            modules: vec![MODULE.to_string()],
            data: json!({}),
        })
        .unwrap();
    engine
}

/// Same (bundle, input) must yield the same decision across many concurrent
/// calls; only the evaluation timestamp may differ.
#[test]
fn concurrent_evaluations_agree() {
    let engine = Arc::new(engine());
    let input = fixed_input();
    let baseline = engine.evaluate(&input).decision;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        let input = input.clone();
        let expected = baseline.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..250 {
                let mut got = engine.evaluate(&input).decision;
                got.evaluated_at = expected.evaluated_at;
                assert_eq!(got, expected);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn violations_order_is_stable() {
    let module = r#"
package mcp.order

deny[{"rule_id": "first", "message": "first rule"}] { true }
deny[{"rule_id": "second", "message": "second rule"}] { true }
deny[{"rule_id": "first", "message": "first rule"}] { true }
"#;
    let engine = Engine::new(EvalLimits::default());
    engine
        .load(BundleManifest {
            version: "v1".into(),
            compiled_at: chrono::Utc::now(),
            modules: vec![module.to_string()],
            data: json!({}),
        })
        .unwrap();
    for _ in 0..100 {
        let result = engine.evaluate(&fixed_input());
        let ids: Vec<&str> =
            result.decision.violations.iter().map(|v| v.rule_id.as_str()).collect();
        // Duplicates are unioned away; order is module/rule order.
        assert_eq!(ids, vec!["first", "second"]);
    }
}

#[test]
fn decision_is_independent_of_wall_clock() {
    let engine = engine();
    let input = fixed_input();
    let a = engine.evaluate(&input).decision;
    std::thread::sleep(std::time::Duration::from_millis(20));
    let mut b = engine.evaluate(&input).decision;
    b.evaluated_at = a.evaluated_at;
    assert_eq!(a, b);
}

#[test]
fn obligations_fire_from_resource_name() {
    let result = engine().evaluate(&fixed_input());
    assert!(result.decision.allow);
    assert!(result
        .decision
        .obligations
        .contains(&warden_core::decision::Obligation::RedactSecrets));
}

proptest::proptest! {
    /// Allow iff the principal shares a team with the resource, for any
    /// team sets — and the engine never reports an error for well-formed
    /// input.
    #[test]
    fn team_overlap_policy_is_total(
        teams in proptest::collection::btree_set("team-[a-e]", 0..4),
        owners in proptest::collection::btree_set("team-[a-e]", 0..4),
    ) {
        let engine = engine();
        let mut req = fixed_input();
        req.resource.environment = Environment::Dev;
        req.principal.teams = teams.clone();
        req.resource.team_owners = owners.clone();
        let result = engine.evaluate(&req);
        proptest::prop_assert!(!result.error);
        let expect_allow = teams.intersection(&owners).next().is_some();
        proptest::prop_assert_eq!(result.decision.allow, expect_allow);
        proptest::prop_assert!(result.decision.invariants_hold());
    }
}

#[test]
fn in_flight_snapshot_survives_swap() {
    let engine = engine();
    let snapshot = engine.snapshot().unwrap();
    engine
        .load(BundleManifest {
            version: "v2".into(),
            compiled_at: chrono::Utc::now(),
            modules: vec!["package empty\n".to_string()],
            data: json!({}),
        })
        .unwrap();
    // The old snapshot still evaluates exactly as before the swap.
    let result = Engine::evaluate_against(
        &snapshot,
        &fixed_input(),
        EvalLimits::default(),
        chrono::Utc::now(),
    );
    assert!(result.decision.allow);
    assert_eq!(result.decision.policy_version, "v1");
    // The engine itself now answers for v2.
    assert_eq!(engine.current_version().as_deref(), Some("v2"));
}
