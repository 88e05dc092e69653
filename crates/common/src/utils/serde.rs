//! Serialization helpers for durations in config documents
//!
//! Config files spell durations either as integer milliseconds
//! (`base_delay_ms = 100`) or as fractional seconds (`timeout_seconds = 60.0`).
//! These modules plug into `#[serde(with = "...")]` so the Rust side can
//! keep using [`Duration`].

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

/// Duration as integer milliseconds
///
/// ```rust
/// use std::time::Duration;
///
/// use rampart_common::utils::serde::duration_millis;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "duration_millis")]
///     delay: Duration,
/// }
/// ```
pub mod duration_millis {
    use super::{Deserialize, Deserializer, Duration, SerializeResult, Serializer};

    /// Serialize a Duration as milliseconds (u64)
    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
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

/// Optional duration as integer milliseconds; absent or null means `None`
pub mod option_duration_millis {
    use super::{Deserialize, Deserializer, Duration, SerializeResult, Serializer};

    /// Serialize an optional Duration as milliseconds
    #[allow(clippy::cast_possible_truncation, clippy::ref_option)]
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        match duration {
            Some(value) => serializer.serialize_some(&(value.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize optional milliseconds into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Duration as fractional seconds (f64)
///
/// Negative, NaN or infinite values are rejected at parse time.
pub mod duration_secs_f64 {
    use serde::de::Error as _;

    use super::{Deserialize, Deserializer, Duration, SerializeResult, Serializer};

    /// Serialize a Duration as fractional seconds
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    /// Deserialize fractional seconds into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| D::Error::custom(format!("invalid duration in seconds: {secs}")))
    }
}
