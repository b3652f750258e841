//! Serialization helpers for `Duration` fields.
//!
//! Config files and JSON payloads carry durations as plain integers. These
//! modules are meant to be used with `#[serde(with = "...")]`.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serde serialization result type
type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

/// Duration encoded as whole milliseconds (`u64`).
///
/// # Usage
/// ```rust
/// use std::time::Duration;
///
/// use qrgen_common::duration_millis;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "duration_millis")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_millis {
    use super::{Deserialize, Deserializer, Duration, SerializeResult, Serializer};

    /// Serialize a Duration as milliseconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize milliseconds (u64) into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Duration encoded as whole seconds (`u64`). Used for polling intervals.
pub mod duration_secs {
    use super::{Deserialize, Deserializer, Duration, SerializeResult, Serializer};

    /// Serialize a Duration as seconds (u64), truncating sub-second parts
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    /// Deserialize seconds (u64) into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
