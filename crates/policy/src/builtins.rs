//! Closed builtin table for the rule subset.
//!
//! Unknown names are rejected when a bundle loads, which doubles as the gate
//! against network/filesystem builtins: they simply do not exist here.

use crate::eval::EvalError;
use chrono::{Datelike, TimeZone, Timelike, Utc};
use serde_json::Value as JsonValue;
use std::net::IpAddr;

/// Builtin names and arities. Load-time resolution checks against this table.
pub const BUILTINS: &[(&str, usize)] = &[
    ("startswith", 2),
    ("endswith", 2),
    ("contains", 2),
    ("lower", 1),
    ("upper", 1),
    ("count", 1),
    ("glob.match", 2),
    ("regex.match", 2),
    ("net.cidr_contains", 2),
    ("time.now_ns", 0),
    ("time.clock_hour", 1),
    ("time.weekday", 1),
];

/// Arity of a builtin, `None` when the name is unknown.
#[must_use]
pub fn arity(name: &str) -> Option<usize> {
    BUILTINS.iter().find(|(n, _)| *n == name).map(|(_, a)| *a)
}

fn want_str<'a>(name: &str, v: &'a JsonValue) -> Result<&'a str, EvalError> {
    v.as_str().ok_or_else(|| EvalError::Type(format!("{name} expects a string argument")))
}

fn want_i64(name: &str, v: &JsonValue) -> Result<i64, EvalError> {
    v.as_i64().ok_or_else(|| EvalError::Type(format!("{name} expects an integer argument")))
}

/// Evaluate a builtin over already-evaluated arguments.
///
/// `request_ns` is the request timestamp in nanoseconds; `time.now_ns`
/// returns it rather than the wall clock so evaluation stays deterministic
/// per (bundle, input). `regex_lookup` resolves load-time-compiled patterns.
pub fn call(
    name: &str,
    args: &[JsonValue],
    request_ns: i64,
    regex_lookup: &dyn Fn(&str) -> Option<regex::Regex>,
) -> Result<JsonValue, EvalError> {
    match name {
        "startswith" => {
            let s = want_str(name, &args[0])?;
            let prefix = want_str(name, &args[1])?;
            Ok(JsonValue::Bool(s.starts_with(prefix)))
        }
        "endswith" => {
            let s = want_str(name, &args[0])?;
            let suffix = want_str(name, &args[1])?;
            Ok(JsonValue::Bool(s.ends_with(suffix)))
        }
        "contains" => {
            let s = want_str(name, &args[0])?;
            let sub = want_str(name, &args[1])?;
            Ok(JsonValue::Bool(s.contains(sub)))
        }
        "lower" => Ok(JsonValue::String(want_str(name, &args[0])?.to_lowercase())),
        "upper" => Ok(JsonValue::String(want_str(name, &args[0])?.to_uppercase())),
        "count" => {
            let n = match &args[0] {
                JsonValue::Array(a) => a.len(),
                JsonValue::Object(m) => m.len(),
                JsonValue::String(s) => s.chars().count(),
                _ => return Err(EvalError::Type("count expects a collection or string".into())),
            };
            Ok(JsonValue::Number(n.into()))
        }
        "glob.match" => {
            let pattern = want_str(name, &args[0])?;
            let s = want_str(name, &args[1])?;
            Ok(JsonValue::Bool(glob_match(pattern, s)))
        }
        "regex.match" => {
            let pattern = want_str(name, &args[0])?;
            let s = want_str(name, &args[1])?;
            let re = regex_lookup(pattern).ok_or_else(|| {
                // Patterns are literals compiled at load; a miss is an engine bug.
                EvalError::Type(format!("regex pattern not precompiled: {pattern}"))
            })?;
            Ok(JsonValue::Bool(re.is_match(s)))
        }
        "net.cidr_contains" => {
            let cidr = want_str(name, &args[0])?;
            let ip = want_str(name, &args[1])?;
            Ok(JsonValue::Bool(cidr_contains(cidr, ip)?))
        }
        "time.now_ns" => Ok(JsonValue::Number(request_ns.into())),
        "time.clock_hour" => {
            let ns = want_i64(name, &args[0])?;
            let ts = Utc
                .timestamp_nanos(ns);
            Ok(JsonValue::Number(i64::from(ts.hour()).into()))
        }
        "time.weekday" => {
            let ns = want_i64(name, &args[0])?;
            let ts = Utc.timestamp_nanos(ns);
            let day = match ts.weekday() {
                chrono::Weekday::Mon => "Monday",
                chrono::Weekday::Tue => "Tuesday",
                chrono::Weekday::Wed => "Wednesday",
                chrono::Weekday::Thu => "Thursday",
                chrono::Weekday::Fri => "Friday",
                chrono::Weekday::Sat => "Saturday",
                chrono::Weekday::Sun => "Sunday",
            };
            Ok(JsonValue::String(day.to_string()))
        }
        other => Err(EvalError::Type(format!("unknown builtin '{other}'"))),
    }
}

/// Minimal glob matching with `*` (any run) and `?` (any one char).
fn glob_match(pattern: &str, s: &str) -> bool {
    fn rec(p: &[char], s: &[char]) -> bool {
        match p.split_first() {
            None => s.is_empty(),
            Some(('*', rest)) => {
                (0..=s.len()).any(|skip| rec(rest, &s[skip..]))
            }
            Some(('?', rest)) => s.split_first().is_some_and(|(_, tail)| rec(rest, tail)),
            Some((c, rest)) => s.split_first().is_some_and(|(h, tail)| h == c && rec(rest, tail)),
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let sc: Vec<char> = s.chars().collect();
    rec(&p, &sc)
}

/// CIDR membership over `std::net` addresses; mixed address families are
/// simply not contained.
fn cidr_contains(cidr: &str, ip: &str) -> Result<bool, EvalError> {
    let (net, len) = cidr
        .split_once('/')
        .ok_or_else(|| EvalError::Type(format!("invalid CIDR '{cidr}'")))?;
    let prefix: u32 = len
        .parse()
        .map_err(|_| EvalError::Type(format!("invalid CIDR prefix length '{len}'")))?;
    let net: IpAddr = net
        .parse()
        .map_err(|_| EvalError::Type(format!("invalid CIDR network '{net}'")))?;
    let ip: IpAddr = ip
        .parse()
        .map_err(|_| EvalError::Type(format!("invalid IP address '{ip}'")))?;
    match (net, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            if prefix > 32 {
                return Err(EvalError::Type(format!("invalid IPv4 prefix /{prefix}")));
            }
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            Ok(u32::from(net) & mask == u32::from(ip) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            if prefix > 128 {
                return Err(EvalError::Type(format!("invalid IPv6 prefix /{prefix}")));
            }
            let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
            Ok(u128::from(net) & mask == u128::from(ip) & mask)
        }
        _ => Ok(false),
    }
}
