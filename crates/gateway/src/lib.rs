//! Authorization gateway: the coordinator tying cache, engine, classifier,
//! and audit sink together.
//!
//! One [`Gateway`] value is constructed at startup and shared by reference;
//! there are no process-global singletons. The authorize hot path is
//! synchronous CPU work until it hands the audit record to the sink, the
//! only suspension point. Every error path denies: the gateway never turns
//! a fault into an allow.

#![deny(unsafe_code)]

pub mod classify;
pub mod config;
pub mod http;
mod invalidation;

pub use classify::{Classifier, ClassifierConfigError, SensitivityConfig};
pub use config::{ConfigError, GatewayConfig};
pub use invalidation::InvalidationController;

use audit_log::{AuditSink, AuditWriter};
use decision_cache::DecisionCache;
use policy::{BundleManifest, Engine, LoadError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use telemetry::{GatewayMetrics, GatewayMetricsSnapshot};
use tracing::{debug, info, warn};
use warden_core::decision::{AuthorizationDecision, Obligation, Violation};
use warden_core::fingerprint;
use warden_core::ids;
use warden_core::input::{AuthorizationInput, Sensitivity};
use warden_core::validate::validate_input;
use warden_core::DecisionRecord;

/// Combined counters for the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    /// Decision-path counters.
    pub gateway: GatewayMetricsSnapshot,
    /// Audit sink counters.
    pub audit: audit_log::SinkMetricsSnapshot,
    /// Cache counters.
    pub cache: decision_cache::CacheStats,
}

/// The assembled core. Construct once with [`Gateway::new`], wrap in an
/// `Arc`, and hand clones to the transport adapters.
pub struct Gateway {
    engine: Engine,
    cache: Arc<DecisionCache>,
    classifier: Classifier,
    sink: AuditSink,
    metrics: Arc<GatewayMetrics>,
    invalidation: InvalidationController,
    degraded_threshold: u32,
    consecutive_engine_errors: AtomicU32,
    degraded: AtomicBool,
}

impl Gateway {
    /// Assemble the core against a pluggable audit writer. Must run inside a
    /// tokio runtime (the sink spawns its batcher task).
    #[must_use]
    pub fn new(config: &GatewayConfig, writer: Arc<dyn AuditWriter>) -> Self {
        let cache = Arc::new(DecisionCache::new(config.cache));
        let metrics = Arc::new(GatewayMetrics::new());
        let invalidation = InvalidationController::new(
            Arc::clone(&cache),
            Arc::clone(&metrics),
            config.strict_resource_invalidation,
        );
        Self {
            engine: Engine::new(config.eval_limits),
            cache,
            classifier: Classifier::new(config.sensitivity.clone()),
            sink: AuditSink::spawn(writer, config.sink.clone()),
            metrics,
            invalidation,
            degraded_threshold: config.degraded_threshold,
            consecutive_engine_errors: AtomicU32::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    /// The authorize hot path (spec algorithm): validate, fingerprint, probe
    /// the cache, evaluate on miss, rewrite MFA obligations, cache, audit.
    pub async fn authorize(&self, input: &AuthorizationInput) -> AuthorizationDecision {
        let received = ids::now();
        let fingerprint = fingerprint::of_input(input);

        if let Err(err) = validate_input(input, received) {
            self.metrics.record_validation_failure();
            debug!(request_id = %input.context.request_id, error = %err, "input rejected");
            let decision = AuthorizationDecision::deny(
                format!("invalid input: {err}"),
                input.policy_version.clone(),
                received,
            );
            return self.finish(input, decision, fingerprint, false, 0).await;
        }

        if self.is_degraded() {
            self.metrics.record_degraded_denial();
            let decision = AuthorizationDecision::deny(
                "policy engine degraded",
                input.policy_version.clone(),
                received,
            );
            return self.finish(input, decision, fingerprint, false, 0).await;
        }

        if let Some(cached) = self.cache.get(&fingerprint) {
            let decision = (*cached).clone();
            return self.finish(input, decision, fingerprint, true, 0).await;
        }

        let started = Instant::now();
        let result = self.engine.evaluate(input);
        let duration_ns = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        let mut decision = result.decision;

        if result.error {
            let timeout = decision.reason.contains("timeout");
            self.metrics.record_engine_error(timeout);
            self.note_engine_error();
            // Error decisions are never cached.
            return self.finish(input, decision, fingerprint, false, duration_ns).await;
        }
        self.consecutive_engine_errors.store(0, Ordering::Relaxed);

        // MFA obligation rewrite happens before caching so the cached entry
        // matches what callers observe.
        let mfa_forced = decision.obligations.contains(&Obligation::RequireMfa)
            && !input.principal.mfa_verified;
        if mfa_forced && decision.allow {
            decision.allow = false;
            decision.violations.push(Violation {
                rule_id: "mfa_required".into(),
                message: "MFA required for this resource".into(),
            });
            decision.reason = "MFA required for this resource".into();
        }

        let sensitivity =
            self.classifier.classify(input.action, &input.resource, &decision);
        // MFA-forced denials stay on the shortest TTL so a proven caller is
        // re-evaluated promptly.
        let ttl = if mfa_forced {
            self.classifier.ttl(Sensitivity::Critical)
        } else {
            self.classifier.ttl(sensitivity)
        };
        self.cache.put(fingerprint, input.principal.id.clone(), decision.clone(), ttl);

        self.finish_classified(input, decision, fingerprint, false, duration_ns, sensitivity)
            .await
    }

    /// Install a new bundle and invalidate every cache entry tagged with the
    /// previous version. Returns the replaced version, if any.
    pub fn reload(&self, manifest: BundleManifest) -> Result<Option<String>, LoadError> {
        let version = manifest.version.clone();
        let previous = self.engine.load(manifest)?;
        self.metrics.record_reload();
        self.consecutive_engine_errors.store(0, Ordering::Relaxed);
        if self.degraded.swap(false, Ordering::Relaxed) {
            info!(%version, "bundle reload cleared degraded mode");
        }
        if let Some(previous) = &previous {
            self.invalidation.on_policy_updated(previous);
        }
        info!(%version, previous = previous.as_deref().unwrap_or("<none>"), "bundle installed");
        Ok(previous)
    }

    /// Install a raw JSON manifest (the management endpoint).
    pub fn reload_json(&self, raw: &serde_json::Value) -> Result<Option<String>, LoadError> {
        self.reload(BundleManifest::from_json(raw)?)
    }

    /// Version of the active bundle.
    #[must_use]
    pub fn policy_version(&self) -> Option<String> {
        self.engine.current_version()
    }

    /// The cache-invalidation event surface (C6).
    #[must_use]
    pub const fn invalidation(&self) -> &InvalidationController {
        &self.invalidation
    }

    /// Cache counter snapshot.
    #[must_use]
    pub fn cache_stats(&self) -> decision_cache::CacheStats {
        self.cache.stats()
    }

    /// Remove expired cache entries; returns how many were dropped. Wire
    /// this to a periodic maintenance task.
    pub fn sweep_cache(&self) -> usize {
        self.cache.sweep_expired()
    }

    /// Combined metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> MetricsReport {
        MetricsReport {
            gateway: self.metrics.snapshot(),
            audit: self.sink.metrics(),
            cache: self.cache.stats(),
        }
    }

    /// Whether the gateway is currently denying everything (engine fault
    /// threshold exceeded).
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Drain the audit sink and stop its batcher. Call exactly once at
    /// shutdown; the clean-exit path depends on it.
    pub async fn shutdown(&self) -> Result<(), audit_log::AuditError> {
        self.sink.close().await
    }

    /// Flush pending audit records (tests and management tooling).
    pub async fn flush_audit(&self) -> Result<(), audit_log::AuditError> {
        self.sink.flush().await
    }

    /// Dead-lettered audit records (operator tooling and tests).
    #[must_use]
    pub fn drain_audit_dead_letters(&self) -> Vec<DecisionRecord> {
        self.sink.drain_dead_letters()
    }

    fn note_engine_error(&self) {
        if self.degraded_threshold == 0 {
            return;
        }
        let seen = self.consecutive_engine_errors.fetch_add(1, Ordering::Relaxed) + 1;
        if seen >= self.degraded_threshold && !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(consecutive = seen, "entering degraded mode; reload the bundle to recover");
        }
    }

    async fn finish(
        &self,
        input: &AuthorizationInput,
        decision: AuthorizationDecision,
        fingerprint: warden_core::Fingerprint,
        cache_hit: bool,
        duration_ns: u64,
    ) -> AuthorizationDecision {
        let sensitivity =
            self.classifier.classify(input.action, &input.resource, &decision);
        self.finish_classified(input, decision, fingerprint, cache_hit, duration_ns, sensitivity)
            .await
    }

    async fn finish_classified(
        &self,
        input: &AuthorizationInput,
        decision: AuthorizationDecision,
        fingerprint: warden_core::Fingerprint,
        cache_hit: bool,
        duration_ns: u64,
        sensitivity: Sensitivity,
    ) -> AuthorizationDecision {
        self.metrics.record_decision(decision.allow);
        let record = DecisionRecord::new(
            input,
            &decision,
            fingerprint,
            cache_hit,
            duration_ns,
            sensitivity,
        );
        self.sink.append(record).await;
        decision
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("policy_version", &self.policy_version())
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}
