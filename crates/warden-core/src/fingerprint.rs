//! Deterministic 128-bit content fingerprints over the authorization-relevant
//! projection of an input.
//!
//! The fingerprint is the decision-cache key and is derived from untrusted
//! principal input, so it is a truncated SHA-256 rather than a seedable
//! non-cryptographic hash. Every hashed component is length-prefixed to keep
//! the encoding injective, and every collection is serialized in sorted order
//! so key reordering cannot change the digest.

use crate::input::AuthorizationInput;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// 128-bit content hash identifying the authorization-relevant projection of
/// an input. Rendered as 32 lowercase hex characters on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    /// Raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Construct from raw bytes (tests and decoding).
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight bytes as a little-endian u64, used for shard selection.
    /// The fingerprint is already uniformly distributed, so no re-hashing.
    #[must_use]
    pub fn shard_key(&self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(b)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s)?;
        let bytes: [u8; 16] =
            raw.try_into().map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Canonical JSON rendering: object keys sorted, arrays in order, scalars via
/// `serde_json`. Same logical value always yields the same bytes.
#[must_use]
pub fn canonical_json(value: &JsonValue) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String((*k).clone()).to_string());
                out.push(':');
                write_canonical(&map[*k], out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-256 of `input` truncated to 16 bytes, lowercase hex (32 chars).
/// Used for the audited `client_ip_hash` so raw addresses never land on disk.
#[must_use]
pub fn hash_truncated_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..16])
}

fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Compute the fingerprint of an authorization input.
///
/// Included, in fixed order: principal id, action, resource kind and id,
/// canonical parameters, policy version, canonical principal attributes,
/// sorted team set, MFA flag, and the geo country hint. Deliberately
/// excluded: timestamps, request/session ids, and the raw client IP.
#[must_use]
pub fn of_input(input: &AuthorizationInput) -> Fingerprint {
    let mut hasher = Sha256::new();
    feed(&mut hasher, input.principal.id.as_bytes());
    feed(&mut hasher, input.action.as_str().as_bytes());
    feed(&mut hasher, input.resource.kind.as_str().as_bytes());
    feed(&mut hasher, input.resource.id.as_bytes());

    let params = JsonValue::Object(
        input.parameters.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
    );
    feed(&mut hasher, canonical_json(&params).as_bytes());
    feed(&mut hasher, input.policy_version.as_bytes());

    let attrs = JsonValue::Object(
        input.principal.attributes.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
    );
    feed(&mut hasher, canonical_json(&attrs).as_bytes());
    for team in &input.principal.teams {
        feed(&mut hasher, team.as_bytes());
    }
    feed(&mut hasher, &[u8::from(input.principal.mfa_verified)]);
    feed(&mut hasher, input.context.geo_country.as_deref().unwrap_or("").as_bytes());

    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Fingerprint(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{
        Action, Environment, Principal, RequestContext, Resource, ResourceKind, Role, Sensitivity,
    };
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};

    fn sample_input() -> AuthorizationInput {
        let mut parameters = BTreeMap::new();
        parameters.insert("query".to_string(), json!("priority=P0"));
        parameters.insert("limit".to_string(), json!(25));
        AuthorizationInput {
            principal: Principal {
                id: "u-1".into(),
                display_name: "Dev One".into(),
                role: Role::Developer,
                teams: BTreeSet::from(["team-backend".to_string()]),
                attributes: BTreeMap::from([("region".to_string(), json!("eu"))]),
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
                team_owners: BTreeSet::from(["team-backend".to_string()]),
                environment: Environment::Dev,
            },
            parameters,
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

    #[test]
    fn stable_across_parameter_reordering() {
        let a = sample_input();
        let mut b = a.clone();
        // BTreeMap already sorts, so rebuild from a differently-ordered source.
        let mut params = BTreeMap::new();
        params.insert("limit".to_string(), json!(25));
        params.insert("query".to_string(), json!("priority=P0"));
        b.parameters = params;
        assert_eq!(of_input(&a), of_input(&b));
    }

    #[test]
    fn timestamp_and_request_id_are_excluded() {
        let a = sample_input();
        let mut b = a.clone();
        b.context.timestamp = a.context.timestamp + chrono::Duration::seconds(30);
        b.context.request_id = "r-2".into();
        b.context.session_id = Some("s-9".into());
        assert_eq!(of_input(&a), of_input(&b));
    }

    #[test]
    fn included_fields_change_the_fingerprint() {
        let a = sample_input();

        let mut b = a.clone();
        b.policy_version = "v2".into();
        assert_ne!(of_input(&a), of_input(&b));

        let mut c = a.clone();
        c.principal.mfa_verified = true;
        assert_ne!(of_input(&a), of_input(&c));

        let mut d = a.clone();
        d.parameters.insert("query".to_string(), json!("priority=P1"));
        assert_ne!(of_input(&a), of_input(&d));

        let mut e = a.clone();
        e.context.geo_country = Some("DE".into());
        assert_ne!(of_input(&a), of_input(&e));
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let v = json!({"b": {"y": 1, "x": [3, 2]}, "a": null});
        assert_eq!(canonical_json(&v), r#"{"a":null,"b":{"x":[3,2],"y":1}}"#);
    }

    #[test]
    fn hex_roundtrip() {
        let fp = of_input(&sample_input());
        let hexed = fp.to_hex();
        assert_eq!(hexed.len(), 32);
        assert_eq!(hexed.parse::<Fingerprint>().unwrap(), fp);
    }

    #[test]
    fn ip_hash_is_truncated_hex() {
        let h = hash_truncated_hex("10.1.2.3");
        assert_eq!(h.len(), 32);
        assert_eq!(h, hash_truncated_hex("10.1.2.3"));
        assert_ne!(h, hash_truncated_hex("10.1.2.4"));
    }
}
