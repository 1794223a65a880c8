//! Structured logging setup and in-process counters for the gateway.
//!
//! Counters are plain atomics owned by the `Gateway` value — there is no
//! process-global registry. Heavier metric export belongs to the operator's
//! stack; these snapshots feed the JSON metrics endpoint and tests.

#![deny(unsafe_code)]

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Initialize structured logging (JSON) with env filter.
/// Set RUST_LOG, e.g., "info,gateway=debug".
pub fn init_json_logging() {
    let fmt_layer = fmt::layer().json().with_current_span(true).with_span_list(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Counter snapshot for the metrics endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GatewayMetricsSnapshot {
    /// Decisions returned with `allow = true`.
    pub allowed: u64,
    /// Decisions returned with `allow = false`.
    pub denied: u64,
    /// Inputs rejected by structural validation.
    pub validation_failures: u64,
    /// Engine evaluations that failed (including timeouts).
    pub engine_errors: u64,
    /// Engine evaluations that hit the work budget or deadline.
    pub engine_timeouts: u64,
    /// Requests denied while the gateway was in degraded mode.
    pub degraded_denials: u64,
    /// Successful bundle reloads.
    pub reloads: u64,
    /// Resource-change events observed by the invalidation controller.
    pub resource_events: u64,
}

/// Decision-path counters, one instance per gateway.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    allowed: AtomicU64,
    denied: AtomicU64,
    validation_failures: AtomicU64,
    engine_errors: AtomicU64,
    engine_timeouts: AtomicU64,
    degraded_denials: AtomicU64,
    reloads: AtomicU64,
    resource_events: AtomicU64,
}

impl GatewayMetrics {
    /// Fresh zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a returned decision by outcome.
    pub fn record_decision(&self, allow: bool) {
        if allow {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count a structural validation rejection.
    pub fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an engine failure; `timeout` marks budget/deadline exhaustion.
    pub fn record_engine_error(&self, timeout: bool) {
        self.engine_errors.fetch_add(1, Ordering::Relaxed);
        if timeout {
            self.engine_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count a request answered by degraded-mode denial.
    pub fn record_degraded_denial(&self) {
        self.degraded_denials.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a successful bundle reload.
    pub fn record_reload(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a resource-change event.
    pub fn record_resource_event(&self) {
        self.resource_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> GatewayMetricsSnapshot {
        GatewayMetricsSnapshot {
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            engine_errors: self.engine_errors.load(Ordering::Relaxed),
            engine_timeouts: self.engine_timeouts.load(Ordering::Relaxed),
            degraded_denials: self.degraded_denials.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            resource_events: self.resource_events.load(Ordering::Relaxed),
        }
    }
}
