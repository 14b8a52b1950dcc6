//! Serde helpers for policy durations
//!
//! Policy files express every duration as an integer count of milliseconds.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serde result type
type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

fn millis(duration: &Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// `Duration` as milliseconds (`u64`).
///
/// ```rust
/// use std::time::Duration;
///
/// use rampart_resilience::serde::duration_millis;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "duration_millis")]
///     wait: Duration,
/// }
/// ```
pub mod duration_millis {
    use super::*;

    /// Serialize a Duration as milliseconds
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(millis(duration))
    }

    /// Deserialize milliseconds into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `Option<Duration>` as optional milliseconds. Pair with
/// `#[serde(default)]` so a missing key reads as `None`.
pub mod option_duration_millis {
    use super::*;

    /// Serialize as milliseconds, or none
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => serializer.serialize_some(&millis(duration)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize from optional milliseconds
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Durations {
        #[serde(with = "duration_millis")]
        wait: Duration,
        #[serde(default, with = "option_duration_millis")]
        deadline: Option<Duration>,
    }

    #[test]
    fn test_duration_millis_serialize() {
        let data = Durations { wait: Duration::from_millis(1500), deadline: None };

        let json = serde_json::to_string(&data).expect("Should serialize");
        assert_eq!(json, r#"{"wait":1500,"deadline":null}"#);
    }

    #[test]
    fn test_missing_optional_duration_is_none() {
        let data: Durations = serde_json::from_str(r#"{"wait":20}"#).expect("Should deserialize");
        assert_eq!(data.wait, Duration::from_millis(20));
        assert_eq!(data.deadline, None);
    }

    #[test]
    fn test_present_optional_duration() {
        let data: Durations =
            serde_json::from_str(r#"{"wait":0,"deadline":250}"#).expect("Should deserialize");
        assert_eq!(data.wait, Duration::ZERO);
        assert_eq!(data.deadline, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_negative_millis_rejected() {
        let result: Result<Durations, _> = serde_json::from_str(r#"{"wait":-5}"#);
        assert!(result.is_err());
    }
}
