//! Gateway configuration from the environment.
//!
//! Every knob has a `WARDEN_*` variable; unset variables keep the design
//! defaults. Parse failures refuse startup rather than running with a
//! half-understood configuration.

use crate::classify::SensitivityConfig;
use audit_log::SinkConfig;
use decision_cache::CacheConfig;
use policy::EvalLimits;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Listen address for the HTTP adapter.
pub const ENV_LISTEN_ADDR: &str = "WARDEN_LISTEN_ADDR";
/// Total decision-cache capacity (entries).
pub const ENV_CACHE_CAPACITY: &str = "WARDEN_CACHE_CAPACITY";
/// Decision-cache shard count.
pub const ENV_CACHE_SHARDS: &str = "WARDEN_CACHE_SHARDS";
/// Engine per-evaluation step budget.
pub const ENV_ENGINE_MAX_STEPS: &str = "WARDEN_ENGINE_MAX_STEPS";
/// Engine per-evaluation deadline in milliseconds.
pub const ENV_ENGINE_DEADLINE_MS: &str = "WARDEN_ENGINE_DEADLINE_MS";
/// Audit queue capacity (records).
pub const ENV_AUDIT_QUEUE_CAPACITY: &str = "WARDEN_AUDIT_QUEUE_CAPACITY";
/// Audit chunk record-count threshold.
pub const ENV_AUDIT_BATCH_MAX_RECORDS: &str = "WARDEN_AUDIT_BATCH_MAX_RECORDS";
/// Audit chunk age threshold in milliseconds.
pub const ENV_AUDIT_BATCH_MAX_DELAY_MS: &str = "WARDEN_AUDIT_BATCH_MAX_DELAY_MS";
/// Audit admission deadline in milliseconds before dead-lettering.
pub const ENV_AUDIT_APPEND_DEADLINE_MS: &str = "WARDEN_AUDIT_APPEND_DEADLINE_MS";
/// Directory for audit partitions (and the dead-letter tail).
pub const ENV_AUDIT_DIR: &str = "WARDEN_AUDIT_DIR";
/// Consecutive engine errors before degraded mode; 0 disables.
pub const ENV_DEGRADED_THRESHOLD: &str = "WARDEN_DEGRADED_THRESHOLD";
/// Set to 1/true to flush the whole cache on resource-change events.
pub const ENV_STRICT_RESOURCE_INVALIDATION: &str = "WARDEN_STRICT_RESOURCE_INVALIDATION";

/// Per-level TTL overrides in seconds.
pub const ENV_TTL_OVERRIDES: [(&str, fn(&mut SensitivityConfig, u64)); 5] = [
    ("WARDEN_TTL_LOW_SECS", |c, v| c.ttl_seconds.low = v),
    ("WARDEN_TTL_MEDIUM_SECS", |c, v| c.ttl_seconds.medium = v),
    ("WARDEN_TTL_HIGH_SECS", |c, v| c.ttl_seconds.high = v),
    ("WARDEN_TTL_CRITICAL_SECS", |c, v| c.ttl_seconds.critical = v),
    ("WARDEN_TTL_UNSET_SECS", |c, v| c.ttl_seconds.unset = v),
];

/// A configuration variable failed to parse.
#[derive(Debug, Error)]
#[error("invalid {name}='{value}': {message}")]
pub struct ConfigError {
    /// Variable name.
    pub name: String,
    /// Offending value.
    pub value: String,
    /// Parse diagnostic.
    pub message: String,
}

/// Assembled gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// HTTP listen address.
    pub listen_addr: SocketAddr,
    /// Decision-cache sizing.
    pub cache: CacheConfig,
    /// Engine work limits.
    pub eval_limits: EvalLimits,
    /// Audit sink tuning.
    pub sink: SinkConfig,
    /// Audit partition directory.
    pub audit_dir: PathBuf,
    /// Consecutive engine errors before degraded mode; 0 disables.
    pub degraded_threshold: u32,
    /// Coarse-flush the cache on resource-change events.
    pub strict_resource_invalidation: bool,
    /// Classifier document (after env TTL overrides).
    pub sensitivity: SensitivityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let audit_dir = PathBuf::from("audit");
        Self {
            listen_addr: "127.0.0.1:8787".parse().expect("static addr"),
            cache: CacheConfig::default(),
            eval_limits: EvalLimits::default(),
            sink: SinkConfig {
                dead_letter_path: Some(audit_dir.join("dead-letter.jsonl")),
                ..SinkConfig::default()
            },
            audit_dir,
            degraded_threshold: 0,
            strict_resource_invalidation: false,
            sensitivity: SensitivityConfig::default(),
        }
    }
}

fn parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => raw.parse::<T>().map(Some).map_err(|e| ConfigError {
            name: name.to_string(),
            value: raw,
            message: e.to_string(),
        }),
        _ => Ok(None),
    }
}

fn parsed_bool(name: &str) -> Result<Option<bool>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => match raw.as_str() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" => Ok(Some(false)),
            _ => Err(ConfigError {
                name: name.to_string(),
                value: raw,
                message: "expected 1/0, true/false, or yes/no".into(),
            }),
        },
        _ => Ok(None),
    }
}

impl GatewayConfig {
    /// Read the environment on top of the defaults, optionally starting from
    /// a sensitivity document loaded elsewhere.
    pub fn from_env(sensitivity: Option<SensitivityConfig>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(sensitivity) = sensitivity {
            config.sensitivity = sensitivity;
        }

        if let Some(addr) = parsed::<SocketAddr>(ENV_LISTEN_ADDR)? {
            config.listen_addr = addr;
        }
        if let Some(capacity) = parsed::<usize>(ENV_CACHE_CAPACITY)? {
            config.cache.capacity = capacity;
        }
        if let Some(shards) = parsed::<usize>(ENV_CACHE_SHARDS)? {
            config.cache.shard_count = shards;
        }
        if let Some(steps) = parsed::<u64>(ENV_ENGINE_MAX_STEPS)? {
            config.eval_limits.max_steps = steps;
        }
        if let Some(ms) = parsed::<u64>(ENV_ENGINE_DEADLINE_MS)? {
            config.eval_limits.deadline = Duration::from_millis(ms);
        }
        if let Some(capacity) = parsed::<usize>(ENV_AUDIT_QUEUE_CAPACITY)? {
            config.sink.queue_capacity = capacity;
        }
        if let Some(records) = parsed::<usize>(ENV_AUDIT_BATCH_MAX_RECORDS)? {
            config.sink.batch_max_records = records;
        }
        if let Some(ms) = parsed::<u64>(ENV_AUDIT_BATCH_MAX_DELAY_MS)? {
            config.sink.batch_max_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed::<u64>(ENV_AUDIT_APPEND_DEADLINE_MS)? {
            config.sink.append_deadline = Duration::from_millis(ms);
        }
        if let Some(dir) = parsed::<PathBuf>(ENV_AUDIT_DIR)? {
            config.sink.dead_letter_path = Some(dir.join("dead-letter.jsonl"));
            config.audit_dir = dir;
        }
        if let Some(threshold) = parsed::<u32>(ENV_DEGRADED_THRESHOLD)? {
            config.degraded_threshold = threshold;
        }
        if let Some(strict) = parsed_bool(ENV_STRICT_RESOURCE_INVALIDATION)? {
            config.strict_resource_invalidation = strict;
        }
        for (name, apply) in ENV_TTL_OVERRIDES {
            if let Some(seconds) = parsed::<u64>(name)? {
                apply(&mut config.sensitivity, seconds);
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them in one test to avoid
    // interleaving with each other.
    #[test]
    fn env_overrides_apply() {
        std::env::set_var(ENV_CACHE_CAPACITY, "123");
        std::env::set_var(ENV_ENGINE_DEADLINE_MS, "75");
        std::env::set_var("WARDEN_TTL_LOW_SECS", "42");
        std::env::set_var(ENV_STRICT_RESOURCE_INVALIDATION, "true");
        let config = GatewayConfig::from_env(None).unwrap();
        assert_eq!(config.cache.capacity, 123);
        assert_eq!(config.eval_limits.deadline, Duration::from_millis(75));
        assert_eq!(config.sensitivity.ttl_seconds.low, 42);
        assert!(config.strict_resource_invalidation);

        std::env::set_var(ENV_CACHE_CAPACITY, "not-a-number");
        assert!(GatewayConfig::from_env(None).is_err());

        for name in [
            ENV_CACHE_CAPACITY,
            ENV_ENGINE_DEADLINE_MS,
            "WARDEN_TTL_LOW_SECS",
            ENV_STRICT_RESOURCE_INVALIDATION,
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn defaults_are_sane() {
        let config = GatewayConfig::default();
        assert_eq!(config.cache.capacity, 10_000);
        assert_eq!(config.sink.batch_max_records, 10_000);
        assert_eq!(config.degraded_threshold, 0);
        assert!(config.sensitivity.production_bump);
    }
}
