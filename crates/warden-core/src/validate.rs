//! Structural validation of authorization inputs.
//!
//! Validation failures deny the request before any policy evaluation; they
//! are audited but never cached.

use crate::fingerprint::canonical_json;
use crate::input::AuthorizationInput;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Maximum bytes for any single string field.
pub const MAX_FIELD_BYTES: usize = 1024;
/// Maximum serialized size of the parameter map.
pub const MAX_PARAMETERS_BYTES: usize = 64 * 1024;
/// Maximum nesting depth inside `parameters`.
pub const MAX_PARAMETER_DEPTH: usize = 16;
/// Maximum entries per set-like field (teams, tags, team owners).
pub const MAX_SET_ENTRIES: usize = 64;
/// Tolerated clock skew between the request timestamp and this node.
pub const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Why an input failed structural validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A string field exceeds [`MAX_FIELD_BYTES`].
    #[error("field '{field}' is {len} bytes, limit {MAX_FIELD_BYTES}")]
    FieldTooLong {
        /// Offending field path.
        field: &'static str,
        /// Observed byte length.
        len: usize,
    },
    /// The serialized parameter map exceeds [`MAX_PARAMETERS_BYTES`].
    #[error("parameters serialize to {0} bytes, limit {MAX_PARAMETERS_BYTES}")]
    ParametersTooLarge(usize),
    /// A parameter value nests deeper than [`MAX_PARAMETER_DEPTH`].
    #[error("parameter '{0}' exceeds nesting depth {MAX_PARAMETER_DEPTH}")]
    ParametersTooDeep(String),
    /// A set-like field has more than [`MAX_SET_ENTRIES`] entries.
    #[error("field '{field}' has {len} entries, limit {MAX_SET_ENTRIES}")]
    TooManyEntries {
        /// Offending field path.
        field: &'static str,
        /// Observed entry count.
        len: usize,
    },
    /// A principal attribute value is not a scalar.
    #[error("principal attribute '{0}' must be a scalar")]
    AttributeNotScalar(String),
    /// The request timestamp is outside the tolerated skew window.
    #[error("request timestamp skewed by {0}s, limit {MAX_CLOCK_SKEW_SECS}s")]
    ClockSkew(i64),
    /// A required field is empty.
    #[error("field '{0}' must be non-empty")]
    EmptyField(&'static str),
}

fn check_len(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.len() > MAX_FIELD_BYTES {
        return Err(ValidationError::FieldTooLong { field, len: value.len() });
    }
    Ok(())
}

fn check_opt(field: &'static str, value: Option<&str>) -> Result<(), ValidationError> {
    value.map_or(Ok(()), |v| check_len(field, v))
}

fn depth_of(value: &JsonValue) -> usize {
    match value {
        JsonValue::Object(map) => 1 + map.values().map(depth_of).max().unwrap_or(0),
        JsonValue::Array(items) => 1 + items.iter().map(depth_of).max().unwrap_or(0),
        _ => 0,
    }
}

/// Validate an input against the structural invariants.
///
/// `now` is this node's clock; callers pass [`crate::ids::now()`] outside
/// tests.
pub fn validate_input(
    input: &AuthorizationInput,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if input.principal.id.is_empty() {
        return Err(ValidationError::EmptyField("principal.id"));
    }
    if input.resource.id.is_empty() {
        return Err(ValidationError::EmptyField("resource.id"));
    }
    if input.context.request_id.is_empty() {
        return Err(ValidationError::EmptyField("context.request_id"));
    }
    if input.policy_version.is_empty() {
        return Err(ValidationError::EmptyField("policy_version"));
    }

    check_len("principal.id", &input.principal.id)?;
    check_len("principal.display_name", &input.principal.display_name)?;
    check_len("resource.id", &input.resource.id)?;
    check_len("resource.name", &input.resource.name)?;
    check_opt("resource.description", input.resource.description.as_deref())?;
    check_opt("resource.owner", input.resource.owner.as_deref())?;
    check_len("policy_version", &input.policy_version)?;
    check_len("context.request_id", &input.context.request_id)?;
    check_opt("context.session_id", input.context.session_id.as_deref())?;
    check_opt("context.geo_country", input.context.geo_country.as_deref())?;

    if input.principal.teams.len() > MAX_SET_ENTRIES {
        return Err(ValidationError::TooManyEntries {
            field: "principal.teams",
            len: input.principal.teams.len(),
        });
    }
    if input.resource.tags.len() > MAX_SET_ENTRIES {
        return Err(ValidationError::TooManyEntries {
            field: "resource.tags",
            len: input.resource.tags.len(),
        });
    }
    if input.resource.team_owners.len() > MAX_SET_ENTRIES {
        return Err(ValidationError::TooManyEntries {
            field: "resource.team_owners",
            len: input.resource.team_owners.len(),
        });
    }
    for team in &input.principal.teams {
        check_len("principal.teams[]", team)?;
    }
    for tag in &input.resource.tags {
        check_len("resource.tags[]", tag)?;
    }
    for team in &input.resource.team_owners {
        check_len("resource.team_owners[]", team)?;
    }

    for (key, value) in &input.principal.attributes {
        check_len("principal.attributes key", key)?;
        match value {
            JsonValue::String(s) => check_len("principal.attributes value", s)?,
            JsonValue::Number(_) | JsonValue::Bool(_) | JsonValue::Null => {}
            JsonValue::Array(_) | JsonValue::Object(_) => {
                return Err(ValidationError::AttributeNotScalar(key.clone()));
            }
        }
    }

    for (key, value) in &input.parameters {
        check_len("parameters key", key)?;
        let depth = depth_of(value);
        if depth > MAX_PARAMETER_DEPTH {
            return Err(ValidationError::ParametersTooDeep(key.clone()));
        }
    }
    let params = JsonValue::Object(
        input.parameters.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
    );
    let serialized = canonical_json(&params).len();
    if serialized > MAX_PARAMETERS_BYTES {
        return Err(ValidationError::ParametersTooLarge(serialized));
    }

    let skew = (input.context.timestamp - now).num_seconds().abs();
    if skew > MAX_CLOCK_SKEW_SECS {
        return Err(ValidationError::ClockSkew(skew));
    }

    Ok(())
}
