//! Temporal helpers.
//!
//! Documents carry timestamps as RFC 3339 strings and durations as whole
//! seconds. This module owns both encodings plus the elapsed-time rule used
//! by presence comparisons.

use chrono::{DateTime, Duration, Utc};

use crate::error::DecodeError;

/// Parses an RFC 3339 timestamp into UTC.
///
/// # Errors
///
/// Returns `DecodeError::Timestamp` if `value` is not valid RFC 3339.
///
/// # Examples
///
/// ```
/// use beacon_alerts::time::parse_timestamp;
///
/// let at = parse_timestamp("2014-06-11T10:00:00-07:00").unwrap();
/// assert_eq!(at.to_rfc3339(), "2014-06-11T17:00:00+00:00");
/// ```
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DecodeError::Timestamp {
            value: value.to_string(),
            message: e.to_string(),
        })
}

/// Time elapsed between `seen` and `now`.
///
/// A sighting recorded after `now` counts as zero elapsed.
#[must_use]
pub fn elapsed(seen: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let delta = now - seen;
    if delta < Duration::zero() {
        Duration::zero()
    } else {
        delta
    }
}

/// Serde adapter for `chrono::Duration` as whole seconds.
pub mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes a duration as integer seconds.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_seconds())
    }

    /// Deserializes integer seconds into a duration.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        Duration::try_seconds(secs)
            .ok_or_else(|| serde::de::Error::custom(format!("duration out of range: {secs}s")))
    }
}
