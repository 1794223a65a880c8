//! Cache invalidation on external events (C6).
//!
//! A pure consumer of events: policy updates and principal changes purge by
//! index; resource changes are best-effort because the hot path does not
//! index fingerprints by resource. All events are idempotent — repeating one
//! is a no-op beyond counter increments.

use decision_cache::{DecisionCache, InvalidationKey};
use std::sync::Arc;
use telemetry::GatewayMetrics;
use tracing::{debug, info};

/// Event surface for cache purges.
pub struct InvalidationController {
    cache: Arc<DecisionCache>,
    metrics: Arc<GatewayMetrics>,
    strict_resource_flush: bool,
}

impl InvalidationController {
    pub(crate) fn new(
        cache: Arc<DecisionCache>,
        metrics: Arc<GatewayMetrics>,
        strict_resource_flush: bool,
    ) -> Self {
        Self { cache, metrics, strict_resource_flush }
    }

    /// A new bundle became active; drop every decision made under the
    /// previous version.
    pub fn on_policy_updated(&self, previous_version: &str) -> usize {
        let removed = self
            .cache
            .invalidate_matching(&InvalidationKey::PolicyVersion(previous_version.to_string()));
        info!(previous_version, removed, "invalidated cache for replaced bundle");
        removed
    }

    /// A principal's attributes changed upstream; drop every decision that
    /// embedded them.
    pub fn on_principal_changed(&self, principal_id: &str) -> usize {
        let removed = self
            .cache
            .invalidate_matching(&InvalidationKey::Principal(principal_id.to_string()));
        debug!(principal_id, removed, "invalidated cache for changed principal");
        removed
    }

    /// A resource changed. Fingerprints do not index by resource, so the
    /// default is to count the event and let TTLs converge; strict mode
    /// trades a coarse full flush for immediacy.
    pub fn on_resource_changed(&self, resource_id: &str) {
        self.metrics.record_resource_event();
        if self.strict_resource_flush {
            info!(resource_id, "strict resource invalidation: flushing cache");
            self.cache.bulk_flush();
        } else {
            debug!(resource_id, "resource change noted; entries expire via TTL");
        }
    }

    /// Drop everything. Disaster-recovery hammer.
    pub fn bulk_flush(&self) {
        info!("bulk cache flush requested");
        self.cache.bulk_flush();
    }
}
