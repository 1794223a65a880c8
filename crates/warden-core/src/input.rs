//! Typed authorization input: principal, action, resource, parameters, context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

/// Principal role. The set is closed; unrecognized roles deserialize to
/// [`Role::Unknown`] so a newer control plane cannot make this node reject
/// input it could still evaluate.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full administrative principal.
    Admin,
    /// Team lead.
    Lead,
    /// Senior engineer.
    Senior,
    /// Engineer.
    Developer,
    /// Read-mostly analyst.
    Analyst,
    /// Non-human service principal.
    Service,
    /// Any role this build does not know about.
    Unknown,
}

impl<'de> serde::Deserialize<'de> for Role {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Ok(match token.as_str() {
            "admin" => Self::Admin,
            "lead" => Self::Lead,
            "senior" => Self::Senior,
            "developer" => Self::Developer,
            "analyst" => Self::Analyst,
            "service" => Self::Service,
            _ => Self::Unknown,
        })
    }
}

impl Role {
    /// Stable wire token for this role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Lead => "lead",
            Self::Senior => "senior",
            Self::Developer => "developer",
            Self::Analyst => "analyst",
            Self::Service => "service",
            Self::Unknown => "unknown",
        }
    }
}

/// Action token drawn from the closed gateway action set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Action {
    /// Invoke a tool on a backend MCP server.
    #[serde(rename = "tool:invoke")]
    ToolInvoke,
    /// List tools available on a server.
    #[serde(rename = "tool:list")]
    ToolList,
    /// Register a new backend server.
    #[serde(rename = "server:register")]
    ServerRegister,
    /// Read server metadata.
    #[serde(rename = "server:read")]
    ServerRead,
    /// Mutate server metadata.
    #[serde(rename = "server:write")]
    ServerWrite,
    /// Remove a server.
    #[serde(rename = "server:delete")]
    ServerDelete,
    /// Read policy state.
    #[serde(rename = "policy:read")]
    PolicyRead,
    /// Mutate policy state.
    #[serde(rename = "policy:write")]
    PolicyWrite,
}

impl Action {
    /// Stable wire token for this action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToolInvoke => "tool:invoke",
            Self::ToolList => "tool:list",
            Self::ServerRegister => "server:register",
            Self::ServerRead => "server:read",
            Self::ServerWrite => "server:write",
            Self::ServerDelete => "server:delete",
            Self::PolicyRead => "policy:read",
            Self::PolicyWrite => "policy:write",
        }
    }

    /// Whether the action mutates gateway-managed state (used by the
    /// sensitivity classifier's production bump).
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        matches!(
            self,
            Self::ServerRegister | Self::ServerWrite | Self::ServerDelete | Self::PolicyWrite
        )
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of resource an action targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A tool hosted on a backend server.
    Tool,
    /// A backend MCP server.
    Server,
    /// A policy object.
    Policy,
}

impl ResourceKind {
    /// Stable wire token for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Server => "server",
            Self::Policy => "policy",
        }
    }
}

/// Coarse sensitivity classification driving cache TTL selection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    /// Read-only, low-impact.
    Low,
    /// Default tier.
    Medium,
    /// Destructive or privileged.
    High,
    /// Credentials, payments, irreversible operations.
    Critical,
    /// Not classified by the resource owner.
    #[default]
    Unset,
}

impl Sensitivity {
    /// Stable wire token for this level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Unset => "unset",
        }
    }

    /// One level up the ladder, capped at critical. `Unset` is not on the
    /// ladder and bumps to `Medium` (the default tier) first.
    #[must_use]
    pub const fn bumped(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::Unset => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

/// Deployment environment of the resource.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Development.
    #[default]
    Dev,
    /// Staging.
    Staging,
    /// Production.
    Production,
}

/// The already-authenticated principal attempting an action.
///
/// Identity proofs happen upstream; this carries validated attributes only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Principal {
    /// Unique principal id.
    pub id: String,
    /// Human-readable display name.
    #[serde(default)]
    pub display_name: String,
    /// Role of the principal.
    pub role: Role,
    /// Team memberships. Ordered so canonical serialization is stable.
    #[serde(default)]
    pub teams: BTreeSet<String>,
    /// Free-form scalar attributes (string, number, bool, or null values).
    #[serde(default)]
    pub attributes: BTreeMap<String, JsonValue>,
    /// Whether this request carries a fresh MFA proof.
    #[serde(default)]
    pub mfa_verified: bool,
}

/// The resource an action targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Opaque resource id.
    pub id: String,
    /// Resource name (e.g. the tool name).
    pub name: String,
    /// Optional description; the classifier's keyword table scans it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Owner-declared sensitivity, `unset` when absent.
    #[serde(default)]
    pub sensitivity: Sensitivity,
    /// Free-form tags.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Owning principal id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Teams that own the resource.
    #[serde(default)]
    pub team_owners: BTreeSet<String>,
    /// Deployment environment.
    #[serde(default)]
    pub environment: Environment,
}

/// Per-request context. Only the fields that affect authorization feed the
/// fingerprint; timestamps and correlation ids never do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestContext {
    /// Request timestamp, UTC with nanosecond precision.
    pub timestamp: DateTime<Utc>,
    /// Caller IP. Audited only as a truncated hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
    /// Session correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Unique request id; the downstream audit dedup key.
    pub request_id: String,
    /// Optional ISO 3166 country hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_country: Option<String>,
}

/// Immutable, hashable authorization input. One instance per intercepted
/// tool-invocation attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationInput {
    /// Authenticated principal.
    pub principal: Principal,
    /// Requested action.
    pub action: Action,
    /// Target resource.
    pub resource: Resource,
    /// Tool-call parameters (bounded depth and size; see [`crate::validate`]).
    #[serde(default)]
    pub parameters: BTreeMap<String, JsonValue>,
    /// Request context.
    pub context: RequestContext,
    /// Version tag of the active policy bundle.
    pub policy_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_tokens_roundtrip() {
        for (action, token) in [
            (Action::ToolInvoke, "tool:invoke"),
            (Action::ServerDelete, "server:delete"),
            (Action::PolicyWrite, "policy:write"),
        ] {
            let v = serde_json::to_value(action).unwrap();
            assert_eq!(v, json!(token));
            let back: Action = serde_json::from_value(v).unwrap();
            assert_eq!(back, action);
        }
    }

    #[test]
    fn unknown_role_deserializes() {
        let r: Role = serde_json::from_value(json!("wizard")).unwrap();
        assert_eq!(r, Role::Unknown);
    }

    #[test]
    fn sensitivity_bump_caps_at_critical() {
        assert_eq!(Sensitivity::Low.bumped(), Sensitivity::Medium);
        assert_eq!(Sensitivity::High.bumped(), Sensitivity::Critical);
        assert_eq!(Sensitivity::Critical.bumped(), Sensitivity::Critical);
        assert_eq!(Sensitivity::Unset.bumped(), Sensitivity::High);
    }

    #[test]
    fn mutation_actions() {
        assert!(Action::ServerDelete.is_mutation());
        assert!(Action::PolicyWrite.is_mutation());
        assert!(!Action::ToolInvoke.is_mutation());
        assert!(!Action::ToolList.is_mutation());
    }
}
