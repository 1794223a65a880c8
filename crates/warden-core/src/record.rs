//! Append-only decision records handed to the audit sink.

use crate::decision::{AuthorizationDecision, Obligation, Violation};
use crate::fingerprint::{hash_truncated_hex, Fingerprint};
use crate::input::{Action, AuthorizationInput, Sensitivity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

/// One audit record per authorize call. Created by the coordinator, handed to
/// the sink, never mutated. `request_id` is the downstream dedup key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRecord {
    /// Whether the action was permitted.
    pub allow: bool,
    /// Decision reason.
    pub reason: String,
    /// Obligations attached to the decision.
    #[serde(default)]
    pub obligations: BTreeSet<Obligation>,
    /// Filtered parameters returned to the caller.
    #[serde(default)]
    pub filtered_parameters: BTreeMap<String, JsonValue>,
    /// Violations, empty on allow.
    #[serde(default)]
    pub violations: Vec<Violation>,
    /// Bundle version that produced the decision.
    pub policy_version: String,
    /// Evaluation timestamp (RFC 3339, nanosecond precision on the wire).
    pub evaluated_at: DateTime<Utc>,
    /// Lowercase hex of the 128-bit input fingerprint.
    pub input_fingerprint: Fingerprint,
    /// Whether the decision was served from the cache.
    pub cache_hit: bool,
    /// Engine time on a monotonic clock; ~0 for cache hits.
    pub evaluation_duration_ns: u64,
    /// Principal id.
    pub principal_id: String,
    /// Requested action.
    pub action: Action,
    /// Target resource id.
    pub resource_id: String,
    /// Target resource name.
    pub resource_name: String,
    /// Sensitivity the classifier assigned.
    pub sensitivity: Sensitivity,
    /// Truncated SHA-256 of the client IP; raw addresses are never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip_hash: Option<String>,
    /// Request id from the caller context.
    pub request_id: String,
}

impl DecisionRecord {
    /// Assemble a record from the authorize call's parts.
    #[must_use]
    pub fn new(
        input: &AuthorizationInput,
        decision: &AuthorizationDecision,
        fingerprint: Fingerprint,
        cache_hit: bool,
        evaluation_duration_ns: u64,
        sensitivity: Sensitivity,
    ) -> Self {
        Self {
            allow: decision.allow,
            reason: decision.reason.clone(),
            obligations: decision.obligations.clone(),
            filtered_parameters: decision.filtered_parameters.clone(),
            violations: decision.violations.clone(),
            policy_version: decision.policy_version.clone(),
            evaluated_at: decision.evaluated_at,
            input_fingerprint: fingerprint,
            cache_hit,
            evaluation_duration_ns,
            principal_id: input.principal.id.clone(),
            action: input.action,
            resource_id: input.resource.id.clone(),
            resource_name: input.resource.name.clone(),
            sensitivity,
            client_ip_hash: input
                .context
                .client_ip
                .map(|ip| hash_truncated_hex(&ip.to_string())),
            request_id: input.context.request_id.clone(),
        }
    }
}
