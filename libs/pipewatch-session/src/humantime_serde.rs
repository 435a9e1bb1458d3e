//! Serde helpers for human-readable durations (`"30s"`, `"4m"`, `"1h 30m"`).
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Policy {
//!     #[serde(with = "pipewatch_session::humantime_serde")]
//!     delay: Duration,
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer, de};

/// Serializes a `Duration` as a humantime string.
///
/// # Errors
///
/// Propagates serializer errors.
pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&humantime::format_duration(*value))
}

/// Deserializes a `Duration` from a humantime string.
///
/// # Errors
///
/// Fails when the input is not a string or not a valid duration.
pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(d)?;
    humantime::parse_duration(raw.trim()).map_err(de::Error::custom)
}
