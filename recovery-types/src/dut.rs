// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::BatteryState;
use crate::FirmwareChannel;
use crate::ServoState;
use crate::ServoTopology;
use crate::ServoType;
use crate::UsbkeyState;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// Extra-attribute key whose values describe the servo setup.
pub const ATTR_SERVO_SETUP: &str = "servo_setup";
/// Value of [`ATTR_SERVO_SETUP`] marking a dual-child setup.
pub const SERVO_SETUP_DUAL: &str = "dual";
/// Extra-attribute key listing the scheduling pools a DUT belongs to.
pub const ATTR_POOLS: &str = "pools";

/// In-memory snapshot of a device-under-test, the mutable target of a
/// recovery run. The engine creates it before a plan runs, persists it
/// afterwards; execs mutate it in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dut {
    pub name: String,
    pub board: String,
    #[serde(default)]
    pub model: String,
    /// Free-form key → list attributes, notably `servo_setup → {dual}` and
    /// `pools`.
    #[serde(default)]
    pub extra_attributes: BTreeMap<String, Vec<String>>,
    pub servo_host: Option<ServoHost>,
    /// Verdict of the last battery-charging check, if one ran.
    #[serde(default)]
    pub battery_state: BatteryState,
}

impl Dut {
    pub fn has_extra_attribute(&self, key: &str, value: &str) -> bool {
        self.extra_attributes
            .get(key)
            .is_some_and(|vs| vs.iter().any(|v| v == value))
    }

    /// True when any pool attribute contains `needle` as a substring.
    pub fn any_pool_contains(&self, needle: &str) -> bool {
        self.extra_attributes
            .get(ATTR_POOLS)
            .is_some_and(|vs| vs.iter().any(|v| v.contains(needle)))
    }
}

/// The machine a servo is physically connected to and on which servod runs.
/// Remote-accessed over SSH.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServoHost {
    /// Hostname used as the SSH endpoint.
    pub name: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// Port servod listens on; expected to be strictly greater than 9000
    /// when used.
    pub servod_port: u16,
    /// Set when servod runs inside a container on this host.
    #[serde(default)]
    pub container_name: Option<String>,
    pub servo: Option<Servo>,
    /// Last known topology, cached here by execs that run with
    /// `persist_topology` set.
    #[serde(default)]
    pub servo_topology: Option<ServoTopology>,
    #[serde(default)]
    pub usbkey_state: UsbkeyState,
    /// Whether the host was observed to have a smart usbhub, learned as a
    /// side effect of power-cycling the root servo.
    #[serde(default)]
    pub smart_usbhub: bool,
}

fn default_ssh_port() -> u16 {
    22
}

impl ServoHost {
    pub fn is_containerized(&self) -> bool {
        self.container_name.as_deref().is_some_and(|n| !n.is_empty())
    }
}

/// The servo debug board itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Servo {
    pub serial_number: String,
    /// Current `servo_type` descriptor as reported by servod.
    pub servo_type: ServoType,
    #[serde(default)]
    pub firmware_channel: FirmwareChannel,
    #[serde(default)]
    pub state: ServoState,
}

/// Stable-version record for a DUT, as returned by the versioner service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StableVersion {
    pub os_image: String,
    pub fw_version: String,
    pub fw_image: String,
}
