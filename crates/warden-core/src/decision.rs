//! Authorization decisions: the value a policy evaluation produces.
//!
//! Deny is a value here, never an error. Errors are reserved for genuine
//! faults inside the engine and still surface as deny decisions (fail-closed).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

/// Sentinel value substituted for redacted parameter values.
pub const REDACTION_SENTINEL: &str = "[REDACTED]";

/// Side condition attached to an allow decision; the caller must satisfy it
/// for the allow to be binding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Obligation {
    /// Caller must re-present an MFA-proven input.
    RequireMfa,
    /// Decision must be audited at the highest tier.
    AuditHigh,
    /// Caller must strip secrets from tool output.
    RedactSecrets,
}

impl Obligation {
    /// Stable wire token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequireMfa => "require_mfa",
            Self::AuditHigh => "audit_high",
            Self::RedactSecrets => "redact_secrets",
        }
    }

    /// Parse a wire token; `None` for unknown tokens (the engine treats an
    /// unknown obligation as an evaluation error, not a silent drop).
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "require_mfa" => Some(Self::RequireMfa),
            "audit_high" => Some(Self::AuditHigh),
            "redact_secrets" => Some(Self::RedactSecrets),
            _ => None,
        }
    }
}

/// A single rule violation contributing to a deny.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violation {
    /// Identifier of the rule that fired.
    pub rule_id: String,
    /// Human-readable message.
    pub message: String,
}

/// Structured result of a policy evaluation.
///
/// Invariant: `allow == true` implies `violations` is empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationDecision {
    /// Whether the action is permitted.
    pub allow: bool,
    /// Short human-readable reason.
    pub reason: String,
    /// Obligations the caller must honor.
    #[serde(default)]
    pub obligations: BTreeSet<Obligation>,
    /// Subset of the input parameters, possibly with values replaced by
    /// [`REDACTION_SENTINEL`].
    #[serde(default)]
    pub filtered_parameters: BTreeMap<String, JsonValue>,
    /// Ordered violations; empty on allow.
    #[serde(default)]
    pub violations: Vec<Violation>,
    /// Bundle version that produced the decision.
    pub policy_version: String,
    /// Evaluation timestamp, UTC ns.
    pub evaluated_at: DateTime<Utc>,
}

impl AuthorizationDecision {
    /// A plain deny with the given reason and no parameter passthrough.
    #[must_use]
    pub fn deny(
        reason: impl Into<String>,
        policy_version: impl Into<String>,
        evaluated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            allow: false,
            reason: reason.into(),
            obligations: BTreeSet::new(),
            filtered_parameters: BTreeMap::new(),
            violations: Vec::new(),
            policy_version: policy_version.into(),
            evaluated_at,
        }
    }

    /// Check the allow/violations invariant.
    #[must_use]
    pub fn invariants_hold(&self) -> bool {
        !self.allow || self.violations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obligation_tokens() {
        assert_eq!(Obligation::parse("require_mfa"), Some(Obligation::RequireMfa));
        assert_eq!(Obligation::parse("audit_high"), Some(Obligation::AuditHigh));
        assert_eq!(Obligation::parse("launch_missiles"), None);
        assert_eq!(Obligation::RedactSecrets.as_str(), "redact_secrets");
    }

    #[test]
    fn deny_holds_invariants() {
        let d = AuthorizationDecision::deny("nope", "v1", chrono::Utc::now());
        assert!(!d.allow);
        assert!(d.invariants_hold());
    }
}
