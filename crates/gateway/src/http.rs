//! Thin HTTP/JSON adapter over the gateway core.
//!
//! The transport is deliberately minimal: the core is a library and this
//! router only translates JSON bodies to typed calls. Authorization outcomes
//! (denies included) are 200 responses carrying the decision; HTTP error
//! codes are reserved for malformed requests and management failures.

use crate::Gateway;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use warden_core::decision::AuthorizationDecision;
use warden_core::input::AuthorizationInput;

/// Serve the router on an already-bound listener until `shutdown` resolves.
/// In-flight requests complete before this returns.
pub async fn serve(
    listener: tokio::net::TcpListener,
    gateway: Arc<Gateway>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(gateway)).with_graceful_shutdown(shutdown).await
}

/// Build the gateway API router.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/authorize", post(authorize))
        .route("/v1/policy/reload", post(reload))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/v1/metrics", get(metrics))
        .with_state(gateway)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn authorize(
    State(gateway): State<Arc<Gateway>>,
    Json(input): Json<AuthorizationInput>,
) -> Json<AuthorizationDecision> {
    Json(gateway.authorize(&input).await)
}

/// Body of a successful reload.
#[derive(Debug, Serialize)]
struct ReloadResponse {
    version: String,
    previous: Option<String>,
}

/// Body of a rejected reload.
#[derive(Debug, Serialize)]
struct ReloadError {
    error: String,
}

async fn reload(
    State(gateway): State<Arc<Gateway>>,
    Json(manifest): Json<serde_json::Value>,
) -> Result<Json<ReloadResponse>, (StatusCode, Json<ReloadError>)> {
    match gateway.reload_json(&manifest) {
        Ok(previous) => Ok(Json(ReloadResponse {
            version: gateway.policy_version().unwrap_or_default(),
            previous,
        })),
        // The old bundle stays active; tell the management caller why.
        Err(err) => Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ReloadError { error: err.to_string() }),
        )),
    }
}

async fn cache_stats(
    State(gateway): State<Arc<Gateway>>,
) -> Json<decision_cache::CacheStats> {
    Json(gateway.cache_stats())
}

async fn metrics(State(gateway): State<Arc<Gateway>>) -> Json<crate::MetricsReport> {
    Json(gateway.metrics())
}
