//! Warden policy engine.
//!
//! A deterministic, fail-closed interpreter for a fixed Rego-like rule
//! subset, evaluated against typed authorization input. The security
//! baseline is deny-on-error: with no bundle installed, with a bundle that
//! fails to load, or with any evaluation fault, the engine produces a deny
//! decision — never an allow.
//!
//! Decision assembly:
//! - `allow` is true only if at least one `allow` rule fires and no `deny`
//!   rule fires.
//! - `violations` is the union of firing `deny` heads, first-occurrence
//!   order, deduplicated.
//! - `obligations` is the union of firing `obligations` heads.
//! - `filtered_parameters` starts from the input parameters; `redact` rules
//!   substitute the sentinel, `omit` rules drop keys.
//!
//! Evaluation is pure CPU with a per-call step budget and wall deadline;
//! it never suspends and is safe to call concurrently. Bundles swap
//! atomically: in-flight evaluations finish against the bundle they started
//! with.

#![deny(unsafe_code)]

pub mod ast;
pub mod bundle;
pub mod builtins;
pub mod eval;
mod parse;

pub use bundle::{BundleManifest, CompiledBundle, LoadError};
pub use eval::{EvalLimits, EvalResult};
pub use parse::ParseError;

use arc_swap::ArcSwapOption;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use warden_core::decision::AuthorizationDecision;
use warden_core::ids;
use warden_core::input::AuthorizationInput;

/// The policy decision point: holds the active compiled bundle and evaluates
/// inputs against it.
pub struct Engine {
    current: ArcSwapOption<CompiledBundle>,
    limits: EvalLimits,
}

impl Engine {
    /// Construct an engine with no bundle installed. Until a bundle loads,
    /// every evaluation is a fail-closed error decision.
    #[must_use]
    pub fn new(limits: EvalLimits) -> Self {
        Self { current: ArcSwapOption::const_empty(), limits }
    }

    /// Compile and atomically install a bundle. On success returns the
    /// version tag of the bundle it replaced, which the coordinator uses to
    /// invalidate stale cache entries. On failure the previous bundle stays
    /// active.
    pub fn load(&self, manifest: BundleManifest) -> Result<Option<String>, LoadError> {
        let compiled = bundle::compile(manifest)?;
        let previous = self.current.swap(Some(Arc::new(compiled)));
        Ok(previous.map(|b| b.version().to_string()))
    }

    /// Validate and install a raw JSON manifest.
    pub fn load_json(&self, raw: &JsonValue) -> Result<Option<String>, LoadError> {
        self.load(BundleManifest::from_json(raw)?)
    }

    /// Version of the active bundle, if any.
    #[must_use]
    pub fn current_version(&self) -> Option<String> {
        self.current.load().as_ref().map(|b| b.version().to_string())
    }

    /// Snapshot of the active bundle. Holding the `Arc` keeps the bundle
    /// alive across a concurrent swap.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<CompiledBundle>> {
        self.current.load_full()
    }

    /// Evaluate an input against the active bundle.
    ///
    /// Pure compute; never suspends. Safe to call in parallel.
    #[must_use]
    pub fn evaluate(&self, input: &AuthorizationInput) -> EvalResult {
        let evaluated_at = ids::now();
        let Some(bundle) = self.current.load_full() else {
            return EvalResult {
                decision: AuthorizationDecision::deny(
                    "policy evaluation failed: no policy bundle loaded",
                    input.policy_version.clone(),
                    evaluated_at,
                ),
                error: true,
            };
        };
        Self::evaluate_against(&bundle, input, self.limits, evaluated_at)
    }

    /// Evaluate against an explicit bundle snapshot (reload paths and tests).
    #[must_use]
    pub fn evaluate_against(
        bundle: &CompiledBundle,
        input: &AuthorizationInput,
        limits: EvalLimits,
        evaluated_at: chrono::DateTime<chrono::Utc>,
    ) -> EvalResult {
        let input_value = match serde_json::to_value(input) {
            Ok(v) => v,
            Err(e) => {
                return EvalResult {
                    decision: AuthorizationDecision::deny(
                        format!("policy evaluation failed: input serialization: {e}"),
                        bundle.version(),
                        evaluated_at,
                    ),
                    error: true,
                }
            }
        };
        let request_ns = ids::as_ns(input.context.timestamp);
        eval::evaluate(bundle, &input_value, &input.parameters, request_ns, limits, evaluated_at)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EvalLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};
    use warden_core::decision::Obligation;
    use warden_core::input::{
        Action, Environment, Principal, RequestContext, Resource, ResourceKind, Role, Sensitivity,
    };

    fn input(teams: &[&str], owners: &[&str]) -> AuthorizationInput {
        AuthorizationInput {
            principal: Principal {
                id: "u-1".into(),
                display_name: "Dev".into(),
                role: Role::Developer,
                teams: teams.iter().map(|s| (*s).to_string()).collect(),
                attributes: BTreeMap::new(),
                mfa_verified: false,
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
                team_owners: owners.iter().map(|s| (*s).to_string()).collect(),
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

    const TEAM_MODULE_OK: &str = r#"
package mcp.authz

default allow = false

allow {
    input.action == "tool:invoke"
    some team in input.principal.teams
    team in input.resource.team_owners
}
"#;

    const DENY_MODULE: &str = r#"
package mcp.deny

deny[{"rule_id": "team_mismatch", "message": "principal is not in an owning team"}] {
    input.action == "tool:invoke"
    some team in input.principal.teams
    not team in input.resource.team_owners
}
"#;

    fn engine_with(modules: &[&str], version: &str) -> Engine {
        let engine = Engine::default();
        engine
            .load(BundleManifest {
                version: version.into(),
                compiled_at: chrono::Utc::now(),
                modules: modules.iter().map(|s| (*s).to_string()).collect(),
                data: json!({}),
            })
            .unwrap();
        engine
    }

    #[test]
    fn no_bundle_is_fail_closed() {
        let engine = Engine::default();
        let result = engine.evaluate(&input(&["team-backend"], &["team-backend"]));
        assert!(result.error);
        assert!(!result.decision.allow);
        assert!(result.decision.reason.contains("no policy bundle loaded"));
    }

    #[test]
    fn allow_by_team_overlap() {
        let engine = engine_with(&[TEAM_MODULE_OK, DENY_MODULE], "v1");
        let result = engine.evaluate(&input(&["team-backend"], &["team-backend"]));
        assert!(!result.error);
        assert!(result.decision.allow);
        assert!(result.decision.violations.is_empty());
        assert_eq!(result.decision.policy_version, "v1");
        assert_eq!(
            result.decision.filtered_parameters.get("query"),
            Some(&json!("priority=P0"))
        );
    }

    #[test]
    fn deny_by_team_mismatch() {
        let engine = engine_with(&[TEAM_MODULE_OK, DENY_MODULE], "v1");
        let result = engine.evaluate(&input(&["team-frontend"], &["team-backend"]));
        assert!(!result.error);
        assert!(!result.decision.allow);
        assert_eq!(result.decision.violations.len(), 1);
        assert_eq!(result.decision.violations[0].rule_id, "team_mismatch");
    }

    #[test]
    fn obligations_and_redaction() {
        let module = r#"
package mcp.mfa

allow {
    input.action == "tool:invoke"
}

obligations["require_mfa"] {
    input.resource.sensitivity == "critical"
}

redact["query"] {
    input.resource.sensitivity == "critical"
}

omit["internal_hint"] {
    true
}
"#;
        let engine = engine_with(&[module], "v1");
        let mut req = input(&["team-backend"], &["team-backend"]);
        req.resource.sensitivity = Sensitivity::Critical;
        req.parameters.insert("internal_hint".to_string(), json!("drop me"));
        let result = engine.evaluate(&req);
        assert!(result.decision.allow);
        assert!(result.decision.obligations.contains(&Obligation::RequireMfa));
        assert_eq!(
            result.decision.filtered_parameters.get("query"),
            Some(&json!(warden_core::REDACTION_SENTINEL))
        );
        assert!(!result.decision.filtered_parameters.contains_key("internal_hint"));
    }

    #[test]
    fn unknown_obligation_is_error() {
        let module = r#"
package mcp.bad

allow { true }

obligations["launch_missiles"] { true }
"#;
        let engine = engine_with(&[module], "v1");
        let result = engine.evaluate(&input(&[], &[]));
        assert!(result.error);
        assert!(!result.decision.allow);
        assert!(result.decision.reason.contains("launch_missiles"));
    }

    #[test]
    fn step_budget_exhaustion_is_error() {
        let module = r#"
package mcp.slow

allow {
    some a in input.parameters.haystack
    some b in input.parameters.haystack
    some c in input.parameters.haystack
    a == "no"
    b == "no"
    c == "no"
}
"#;
        let engine = Engine::new(EvalLimits {
            max_steps: 2_000,
            deadline: std::time::Duration::from_millis(50),
        });
        engine
            .load(BundleManifest {
                version: "v1".into(),
                compiled_at: chrono::Utc::now(),
                modules: vec![module.to_string()],
                data: json!({}),
            })
            .unwrap();
        let mut req = input(&[], &[]);
        req.parameters.insert("haystack".to_string(), json!(vec!["x"; 64]));
        let result = engine.evaluate(&req);
        assert!(result.error);
        assert!(!result.decision.allow);
        assert!(result.decision.reason.contains("budget"));
    }

    #[test]
    fn bundle_swap_is_atomic_and_reports_previous() {
        let engine = engine_with(&[TEAM_MODULE_OK], "v1");
        assert_eq!(engine.current_version().as_deref(), Some("v1"));
        let prev = engine
            .load(BundleManifest {
                version: "v2".into(),
                compiled_at: chrono::Utc::now(),
                modules: vec![TEAM_MODULE_OK.to_string()],
                data: json!({}),
            })
            .unwrap();
        assert_eq!(prev.as_deref(), Some("v1"));
        assert_eq!(engine.current_version().as_deref(), Some("v2"));
    }

    #[test]
    fn failed_load_keeps_previous_bundle() {
        let engine = engine_with(&[TEAM_MODULE_OK], "v1");
        let err = engine.load(BundleManifest {
            version: "v2".into(),
            compiled_at: chrono::Utc::now(),
            modules: vec!["package broken\n\nallow {\n nonsense_ref\n}\n".to_string()],
            data: json!({}),
        });
        assert!(err.is_err());
        assert_eq!(engine.current_version().as_deref(), Some("v1"));
        assert!(engine.evaluate(&input(&["team-backend"], &["team-backend"])).decision.allow);
    }

    #[test]
    fn helper_negation_expresses_team_mismatch() {
        let module = r#"
package mcp.teams

default allow = false

team_overlap {
    some team in input.principal.teams
    team in input.resource.team_owners
}

allow {
    input.action == "tool:invoke"
    team_overlap
}

deny[{"rule_id": "team_mismatch", "message": "principal is not in an owning team"}] {
    input.action == "tool:invoke"
    not team_overlap
}
"#;
        let engine = engine_with(&[module], "v1");
        let ok = engine.evaluate(&input(&["team-backend"], &["team-backend"]));
        assert!(ok.decision.allow);
        assert!(ok.decision.violations.is_empty());

        let bad = engine.evaluate(&input(&["team-frontend"], &["team-backend"]));
        assert!(!bad.decision.allow);
        assert_eq!(bad.decision.violations.len(), 1);
        assert_eq!(bad.decision.violations[0].rule_id, "team_mismatch");
    }

    #[test]
    fn data_document_is_readable() {
        let module = r#"
package mcp.data

allow {
    input.principal.role in data.trusted_roles
}
"#;
        let engine = Engine::default();
        engine
            .load(BundleManifest {
                version: "v1".into(),
                compiled_at: chrono::Utc::now(),
                modules: vec![module.to_string()],
                data: json!({"trusted_roles": ["developer", "admin"]}),
            })
            .unwrap();
        let result = engine.evaluate(&input(&[], &[]));
        assert!(result.decision.allow);
    }
}
