//! Data-driven sensitivity classification and TTL selection.
//!
//! The keyword table and TTLs are configuration, not code: operators ship a
//! TOML or JSON document and reload without redeploying.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use warden_core::decision::{AuthorizationDecision, Obligation};
use warden_core::input::{Action, Environment, Resource, ResourceKind, Sensitivity};

/// TTL seconds per sensitivity level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TtlSeconds {
    /// TTL for low-sensitivity decisions.
    pub low: u64,
    /// TTL for medium-sensitivity decisions.
    pub medium: u64,
    /// TTL for high-sensitivity decisions.
    pub high: u64,
    /// TTL for critical decisions.
    pub critical: u64,
    /// TTL when the owner declared nothing and no rule classified higher.
    pub unset: u64,
}

impl Default for TtlSeconds {
    fn default() -> Self {
        Self { low: 300, medium: 180, high: 60, critical: 30, unset: 120 }
    }
}

/// Keyword lists scanned against tool names and descriptions. First match in
/// critical → high → medium → low order wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeywordTable {
    /// Keywords classifying a tool as critical.
    pub critical: Vec<String>,
    /// Keywords classifying a tool as high.
    pub high: Vec<String>,
    /// Keywords classifying a tool as medium.
    pub medium: Vec<String>,
    /// Keywords classifying a tool as low.
    pub low: Vec<String>,
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self {
            critical: ["payment", "credential", "secret", "encrypt", "decrypt", "token"]
                .map(String::from)
                .to_vec(),
            high: ["delete", "drop", "exec", "admin", "purge"].map(String::from).to_vec(),
            medium: ["write", "update", "create"].map(String::from).to_vec(),
            low: ["read", "get", "list", "search"].map(String::from).to_vec(),
        }
    }
}

/// The classifier's configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SensitivityConfig {
    /// TTL table.
    pub ttl_seconds: TtlSeconds,
    /// Keyword lists.
    pub keywords: KeywordTable,
    /// Whether production mutations bump the level one step.
    pub production_bump: bool,
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: TtlSeconds::default(),
            keywords: KeywordTable::default(),
            production_bump: true,
        }
    }
}

impl SensitivityConfig {
    /// Load from a `.toml` or `.json` document.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ClassifierConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ClassifierConfigError::Read(path.display().to_string(), e))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => {
                toml::from_str(&text).map_err(|e| ClassifierConfigError::Toml(e.to_string()))
            }
            Some("json") => {
                serde_json::from_str(&text).map_err(|e| ClassifierConfigError::Json(e.to_string()))
            }
            other => Err(ClassifierConfigError::UnknownFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

/// Why the classifier configuration failed to load.
#[derive(Debug, Error)]
pub enum ClassifierConfigError {
    /// Filesystem failure.
    #[error("read {0}: {1}")]
    Read(String, #[source] std::io::Error),
    /// TOML syntax or shape error.
    #[error("toml: {0}")]
    Toml(String),
    /// JSON syntax or shape error.
    #[error("json: {0}")]
    Json(String),
    /// Only `.toml` and `.json` are accepted.
    #[error("unsupported config extension '{0}' (expected toml or json)")]
    UnknownFormat(String),
}

/// Maps (action, resource, decision) to a sensitivity level and TTL.
#[derive(Debug, Clone)]
pub struct Classifier {
    config: SensitivityConfig,
}

impl Classifier {
    /// Build from a loaded configuration.
    #[must_use]
    pub const fn new(config: SensitivityConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &SensitivityConfig {
        &self.config
    }

    /// Classify a decision. Priority: `audit_high` obligation, then the
    /// owner-declared level, then tool keyword inference, then the default
    /// tier; production mutations bump inferred levels one step.
    #[must_use]
    pub fn classify(
        &self,
        action: Action,
        resource: &Resource,
        decision: &AuthorizationDecision,
    ) -> Sensitivity {
        if decision.obligations.contains(&Obligation::AuditHigh) {
            return Sensitivity::Critical;
        }
        if resource.sensitivity != Sensitivity::Unset {
            return resource.sensitivity;
        }
        let inferred = if resource.kind == ResourceKind::Tool {
            self.keyword_level(resource)
        } else {
            None
        };
        let level = inferred.unwrap_or(Sensitivity::Medium);
        if self.config.production_bump
            && resource.environment == Environment::Production
            && action.is_mutation()
        {
            return level.bumped();
        }
        level
    }

    /// Cache TTL for a level.
    #[must_use]
    pub fn ttl(&self, level: Sensitivity) -> Duration {
        let seconds = match level {
            Sensitivity::Low => self.config.ttl_seconds.low,
            Sensitivity::Medium => self.config.ttl_seconds.medium,
            Sensitivity::High => self.config.ttl_seconds.high,
            Sensitivity::Critical => self.config.ttl_seconds.critical,
            Sensitivity::Unset => self.config.ttl_seconds.unset,
        };
        Duration::from_secs(seconds)
    }

    fn keyword_level(&self, resource: &Resource) -> Option<Sensitivity> {
        let mut haystack = resource.name.to_lowercase();
        if let Some(description) = &resource.description {
            haystack.push(' ');
            haystack.push_str(&description.to_lowercase());
        }
        let table = &self.config.keywords;
        let tiers = [
            (&table.critical, Sensitivity::Critical),
            (&table.high, Sensitivity::High),
            (&table.medium, Sensitivity::Medium),
            (&table.low, Sensitivity::Low),
        ];
        for (keywords, level) in tiers {
            if keywords.iter().any(|kw| haystack.contains(kw.as_str())) {
                return Some(level);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn tool(name: &str, sensitivity: Sensitivity, environment: Environment) -> Resource {
        Resource {
            kind: ResourceKind::Tool,
            id: "t-1".into(),
            name: name.into(),
            description: None,
            sensitivity,
            tags: BTreeSet::new(),
            owner: None,
            team_owners: BTreeSet::new(),
            environment,
        }
    }

    fn decision_with(obligations: &[Obligation]) -> AuthorizationDecision {
        AuthorizationDecision {
            allow: true,
            reason: "allowed by policy".into(),
            obligations: obligations.iter().copied().collect(),
            filtered_parameters: BTreeMap::new(),
            violations: Vec::new(),
            policy_version: "v1".into(),
            evaluated_at: chrono::Utc::now(),
        }
    }

    fn classifier() -> Classifier {
        Classifier::new(SensitivityConfig::default())
    }

    #[test]
    fn audit_high_wins_over_everything() {
        let c = classifier();
        let resource = tool("list_issues", Sensitivity::Low, Environment::Dev);
        let d = decision_with(&[Obligation::AuditHigh]);
        assert_eq!(c.classify(Action::ToolInvoke, &resource, &d), Sensitivity::Critical);
    }

    #[test]
    fn declared_sensitivity_wins_over_keywords() {
        let c = classifier();
        let resource = tool("delete_account", Sensitivity::Low, Environment::Dev);
        let d = decision_with(&[]);
        assert_eq!(c.classify(Action::ToolInvoke, &resource, &d), Sensitivity::Low);
    }

    #[test]
    fn keyword_inference_prefers_critical() {
        let c = classifier();
        let d = decision_with(&[]);
        // "delete" (high) and "credential" (critical) both match; critical wins.
        let resource = tool("delete_credential_store", Sensitivity::Unset, Environment::Dev);
        assert_eq!(c.classify(Action::ToolInvoke, &resource, &d), Sensitivity::Critical);
        let resource = tool("purge_logs", Sensitivity::Unset, Environment::Dev);
        assert_eq!(c.classify(Action::ToolInvoke, &resource, &d), Sensitivity::High);
        let resource = tool("list_issues", Sensitivity::Unset, Environment::Dev);
        assert_eq!(c.classify(Action::ToolInvoke, &resource, &d), Sensitivity::Low);
    }

    #[test]
    fn description_feeds_inference() {
        let c = classifier();
        let d = decision_with(&[]);
        let mut resource = tool("helper", Sensitivity::Unset, Environment::Dev);
        resource.description = Some("Rotates the signing secret".into());
        assert_eq!(c.classify(Action::ToolInvoke, &resource, &d), Sensitivity::Critical);
    }

    #[test]
    fn production_mutation_bumps_one_level() {
        let c = classifier();
        let d = decision_with(&[]);
        let mut resource = tool("update_config", Sensitivity::Unset, Environment::Production);
        resource.kind = ResourceKind::Server;
        // Server resource: no keyword inference, default medium, bumped high.
        assert_eq!(c.classify(Action::ServerWrite, &resource, &d), Sensitivity::High);
        // Non-mutating action: no bump.
        assert_eq!(c.classify(Action::ServerRead, &resource, &d), Sensitivity::Medium);
    }

    #[test]
    fn default_is_medium() {
        let c = classifier();
        let d = decision_with(&[]);
        let mut resource = tool("mystery_widget", Sensitivity::Unset, Environment::Dev);
        resource.kind = ResourceKind::Server;
        assert_eq!(c.classify(Action::ServerRead, &resource, &d), Sensitivity::Medium);
    }

    #[test]
    fn ttl_table_defaults() {
        let c = classifier();
        assert_eq!(c.ttl(Sensitivity::Low), Duration::from_secs(300));
        assert_eq!(c.ttl(Sensitivity::Medium), Duration::from_secs(180));
        assert_eq!(c.ttl(Sensitivity::High), Duration::from_secs(60));
        assert_eq!(c.ttl(Sensitivity::Critical), Duration::from_secs(30));
        assert_eq!(c.ttl(Sensitivity::Unset), Duration::from_secs(120));
    }

    #[test]
    fn toml_document_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensitivity.toml");
        std::fs::write(
            &path,
            r#"
production_bump = true

[ttl_seconds]
low = 600
critical = 15

[keywords]
critical = ["payment"]
"#,
        )
        .unwrap();
        let config = SensitivityConfig::from_path(&path).unwrap();
        assert_eq!(config.ttl_seconds.low, 600);
        assert_eq!(config.ttl_seconds.critical, 15);
        // Unlisted levels keep their defaults.
        assert_eq!(config.ttl_seconds.medium, 180);
        assert_eq!(config.keywords.critical, vec!["payment".to_string()]);
    }

    #[test]
    fn json_document_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensitivity.json");
        std::fs::write(&path, r#"{"ttl_seconds": {"high": 45}}"#).unwrap();
        let config = SensitivityConfig::from_path(&path).unwrap();
        assert_eq!(config.ttl_seconds.high, 45);
    }
}
