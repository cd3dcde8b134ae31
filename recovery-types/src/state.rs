// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::Deserialize;
use serde::Serialize;
use std::str::FromStr;

/// Operational condition of a servo, written by execs that diagnose failures
/// and consumed later by reporting.
///
/// The canonical wire form is the UPPERCASE name; anything outside this set
/// is rejected.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServoState {
    #[default]
    Unspecified,
    Working,
    Broken,
    NotConnected,
    NeedReplacement,
    TopologyIssue,
    SbuLowVoltage,
    Cr50ConsoleMissing,
    CcdTestlabIssue,
    ServodIssue,
    LidOpenFailed,
    BadRibbonCable,
    EcBroken,
    DutNotConnected,
    NtpProblem,
    ServodProxyIssue,
    ServoHostIssue,
    ServoUpdaterIssue,
}

/// Error returned when a string does not name a known servo state.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown servo state {0:?}")]
pub struct UnknownServoState(pub String);

impl ServoState {
    /// Parse the canonical UPPERCASE form, rejecting unknown names with an
    /// error that carries the offending string.
    pub fn parse(s: &str) -> Result<Self, UnknownServoState> {
        Self::from_str(s).map_err(|_| UnknownServoState(s.to_string()))
    }
}

/// State of the USB key attached to the servo, persisted on the DUT snapshot.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UsbkeyState {
    #[default]
    Unknown,
    Normal,
    NeedsReplacement,
    NotDetected,
}

/// Condition of the DUT battery, persisted on the DUT snapshot by the
/// battery-charging check.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BatteryState {
    #[default]
    Unknown,
    Normal,
    NeedsReplacement,
}

/// Firmware channel a servo is pinned to. The lowercase name is what
/// `servo_updater -c` expects.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FirmwareChannel {
    #[default]
    Stable,
    Prev,
    Dev,
    Alpha,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn servo_state_round_trips_canonical_names() {
        for (state, name) in [
            (ServoState::Working, "WORKING"),
            (ServoState::SbuLowVoltage, "SBU_LOW_VOLTAGE"),
            (ServoState::Cr50ConsoleMissing, "CR50_CONSOLE_MISSING"),
            (ServoState::LidOpenFailed, "LID_OPEN_FAILED"),
            (ServoState::ServoUpdaterIssue, "SERVO_UPDATER_ISSUE"),
            (ServoState::Unspecified, "UNSPECIFIED"),
        ] {
            assert_eq!(state.to_string(), name);
            assert_eq!(ServoState::parse(name).unwrap(), state);
        }
    }

    #[test]
    fn servo_state_rejects_unknown_names() {
        assert!(ServoState::parse("CR50_NOT_ENUMERATED").is_err());
        assert!(ServoState::parse("working").is_err());
        assert!(ServoState::parse("").is_err());
    }

    #[test]
    fn channel_uses_lowercase_wire_form() {
        assert_eq!(FirmwareChannel::Stable.to_string(), "stable");
        assert_eq!("alpha".parse::<FirmwareChannel>().unwrap(), FirmwareChannel::Alpha);
    }

    #[test]
    fn usbkey_state_serde() {
        let s = serde_json::to_string(&UsbkeyState::NeedsReplacement).unwrap();
        assert_eq!(s, "\"needs_replacement\"");
    }
}
