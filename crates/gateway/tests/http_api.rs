use audit_log::{AuditWriter, SinkConfig, VecWriter};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use gateway::{Gateway, GatewayConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const MODULE: &str = r#"
package mcp.authz

default allow = false

allow {
    input.action == "tool:invoke"
    input.principal.role == "developer"
}
"#;

fn gateway() -> Arc<Gateway> {
    let mut config = GatewayConfig::default();
    config.sink = SinkConfig {
        batch_max_delay: Duration::from_millis(20),
        ..SinkConfig::default()
    };
    let writer = Arc::new(VecWriter::new());
    Arc::new(Gateway::new(&config, writer as Arc<dyn AuditWriter>))
}

fn manifest(version: &str) -> Value {
    json!({
        "version": version,
        "compiled_at": "2026-03-02T09:00:00Z",
        "modules": [MODULE],
        "data": {}
    })
}

fn authorize_body() -> Value {
    json!({
        "principal": {
            "id": "u-1",
            "display_name": "Dev One",
            "role": "developer",
            "teams": ["team-backend"],
            "attributes": {},
            "mfa_verified": false
        },
        "action": "tool:invoke",
        "resource": {
            "kind": "tool",
            "id": "t-1",
            "name": "list_issues",
            "sensitivity": "low",
            "team_owners": ["team-backend"],
            "environment": "dev"
        },
        "parameters": {"query": "priority=P0"},
        "context": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "request_id": "req-http-1"
        },
        "policy_version": "v1"
    })
}

async fn post(router: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get(router: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn authorize_roundtrip_over_http() {
    let gw = gateway();
    gw.reload_json(&manifest("v1")).unwrap();
    let router = gateway::http::router(Arc::clone(&gw));

    let (status, decision) = post(router.clone(), "/v1/authorize", authorize_body()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decision["allow"], json!(true));
    assert_eq!(decision["policy_version"], json!("v1"));
    assert_eq!(decision["violations"], json!([]));

    // Identical input replays from the cache and stays idempotent.
    let (status, replay) = post(router, "/v1/authorize", authorize_body()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay, decision);
    assert_eq!(gw.cache_stats().hits, 1);
}

#[tokio::test]
async fn reload_endpoint_installs_and_rejects() {
    let gw = gateway();
    let router = gateway::http::router(Arc::clone(&gw));

    let (status, body) = post(router.clone(), "/v1/policy/reload", manifest("v1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], json!("v1"));
    assert_eq!(body["previous"], Value::Null);

    let (status, body) = post(
        router.clone(),
        "/v1/policy/reload",
        json!({"version": "v2", "compiled_at": "2026-01-01T00:00:00Z", "modules": ["package broken\n\nallow {\n mystery\n}\n"]}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("unresolved reference"));
    // The rejected bundle left v1 active.
    assert_eq!(gw.policy_version().as_deref(), Some("v1"));

    let (status, body) = post(router, "/v1/policy/reload", manifest("v2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["previous"], json!("v1"));
}

#[tokio::test]
async fn stats_and_metrics_endpoints() {
    let gw = gateway();
    gw.reload_json(&manifest("v1")).unwrap();
    let router = gateway::http::router(Arc::clone(&gw));

    let (status, _) = post(router.clone(), "/v1/authorize", authorize_body()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, stats) = get(router.clone(), "/v1/cache/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["size"], json!(1));
    assert_eq!(stats["shard_count"], json!(16));

    let (status, metrics) = get(router.clone(), "/v1/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["gateway"]["allowed"], json!(1));
    assert_eq!(metrics["gateway"]["reloads"], json!(1));

    let (status, _) = get(router, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
}
