//! Integration tests for utilities module (macros + serde helpers)
//!
//! Uses `impl_label_conversions!` and the duration helpers the way
//! downstream crates do in policy documents.

#![cfg(feature = "foundation")]

use std::str::FromStr;
use std::time::Duration;

use rampart_common::{duration_millis, duration_secs_f64, option_duration_millis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Tier {
    Primary,
    ReadReplica,
    Archive,
}

rampart_common::impl_label_conversions!(Tier {
    Primary => "primary",
    ReadReplica => "read_replica",
    Archive => "archive",
});

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Policy {
    tier: String,
    #[serde(rename = "base_delay_ms", with = "duration_millis")]
    base_delay: Duration,
    #[serde(rename = "cooldown_seconds", with = "duration_secs_f64")]
    cooldown: Duration,
    #[serde(rename = "deadline_ms", default, with = "option_duration_millis")]
    deadline: Option<Duration>,
}

/// Validates label conversions in both directions.
///
/// # Test Steps
/// 1. Render every variant with `Display`
/// 2. Parse labels back, including mixed case
/// 3. Verify unknown labels are rejected with the enum name
#[test]
fn test_label_conversions_round_trip() {
    for tier in [Tier::Primary, Tier::ReadReplica, Tier::Archive] {
        assert_eq!(Tier::from_str(&tier.to_string()), Ok(tier));
    }
    assert_eq!("READ_REPLICA".parse::<Tier>(), Ok(Tier::ReadReplica));

    let err = "tape".parse::<Tier>().expect_err("unknown label");
    assert!(err.contains("Tier"));
}

/// Validates duration helpers inside a TOML policy document.
///
/// # Test Steps
/// 1. Parse a document with millisecond and fractional-second fields
/// 2. Verify the optional field defaults to `None` when absent
/// 3. Re-serialize and parse again to the same value
#[test]
fn test_policy_document_durations() {
    let policy: Policy = toml::from_str(
        "tier = \"primary\"\nbase_delay_ms = 250\ncooldown_seconds = 1.5\n",
    )
    .expect("valid document");

    assert_eq!(policy.tier.parse::<Tier>(), Ok(Tier::Primary));
    assert_eq!(policy.base_delay, Duration::from_millis(250));
    assert_eq!(policy.cooldown, Duration::from_millis(1500));
    assert_eq!(policy.deadline, None);

    let json = serde_json::to_string(&policy).expect("serializable");
    let reparsed: Policy = serde_json::from_str(&json).expect("valid json");
    assert_eq!(reparsed, policy);
}

/// Validates that negative seconds are rejected at parse time.
#[test]
fn test_negative_seconds_rejected() {
    let result: Result<Policy, _> =
        toml::from_str("tier = \"archive\"\nbase_delay_ms = 1\ncooldown_seconds = -2.0\n");
    assert!(result.is_err());
}
