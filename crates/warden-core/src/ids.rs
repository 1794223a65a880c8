//! ID and time utilities: request ids and UTC timestamps.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Current UTC time with nanosecond precision.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Nanoseconds since UNIX epoch for the given instant.
///
/// Saturates instead of overflowing for timestamps outside the
/// representable range (year 2262), which is fine for wall-clock use.
#[must_use]
pub fn as_ns(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Opaque request identifier (UUID v4 string).
#[must_use]
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_format() {
        let id = new_request_id();
        assert_eq!(id.len(), 36);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
    }

    #[test]
    fn ns_roundtrip_is_monotonic() {
        let a = as_ns(now());
        let b = as_ns(now());
        assert!(b >= a);
    }
}
