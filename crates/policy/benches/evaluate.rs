use criterion::{criterion_group, criterion_main, Criterion};
use policy::{BundleManifest, Engine, EvalLimits};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
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

obligations["require_mfa"] {
    input.resource.sensitivity == "critical"
}
"#;

fn bench_input() -> AuthorizationInput {
    AuthorizationInput {
        principal: Principal {
            id: "u-1".into(),
            display_name: "Bench".into(),
            role: Role::Developer,
            teams: BTreeSet::from(["team-backend".to_string()]),
            attributes: BTreeMap::new(),
            mfa_verified: true,
        },
        action: Action::ToolInvoke,
        resource: Resource {
            kind: ResourceKind::Tool,
            id: "t-1".into(),
            name: "list_issues".into(),
            description: None,
            sensitivity: Sensitivity::Low,
            tags: BTreeSet::new(),
            owner: None,
            team_owners: BTreeSet::from(["team-backend".to_string()]),
            environment: Environment::Dev,
        },
        parameters: BTreeMap::from([("query".to_string(), json!("priority=P0"))]),
        context: RequestContext {
            timestamp: chrono::Utc::now(),
            client_ip: None,
            session_id: None,
            request_id: "r-1".into(),
            geo_country: None,
        },
        policy_version: "v1".into(),
    }
}

fn bench_evaluate(c: &mut Criterion) {
    let engine = Engine::new(EvalLimits::default());
    engine
        .load(BundleManifest {
            version: "v1".into(),
            compiled_at: chrono::Utc::now(),
            modules: vec![MODULE.to_string()],
            data: json!({}),
        })
        .unwrap();
    let input = bench_input();
    c.bench_function("evaluate_warm_engine", |b| {
        b.iter(|| {
            let result = engine.evaluate(&input);
            assert!(result.decision.allow);
        })
    });
}

criterion_group!(benches, bench_evaluate);
criterion_main!(benches);
