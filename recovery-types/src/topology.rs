// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// One servo device discovered under the root servo's USB hub, read from its
/// sysfs directory on the servo-host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServoTopologyItem {
    /// Device type classified from the sysfs VID:PID pair, e.g. `servo_v4`.
    /// Empty when the pair is not in the known table.
    pub device_type: String,
    /// USB serial number.
    pub serial: String,
    /// USB-hub port string from the sysfs `devpath` file.
    pub usb_hub_port: String,
    /// Firmware version from the sysfs `configuration` file.
    pub fw_version: String,
    /// Directory this item was read from, e.g.
    /// `/sys/bus/usb/devices/1-3.2.1`.
    pub sysfs_path: String,
    /// Contents of the sysfs `product` file.
    pub sysfs_product: String,
}

impl ServoTopologyItem {
    /// An item is good when it carries the minimum data needed to act on it:
    /// serial, type, and hub port are all non-empty.
    pub fn is_good(&self) -> bool {
        !self.serial.is_empty()
            && !self.device_type.is_empty()
            && !self.usb_hub_port.is_empty()
    }
}

impl fmt::Display for ServoTopologyItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deviceType {:?}, product {:?}, serial {:?}, hub {:?}, path {:?}, version {:?}",
            self.device_type,
            self.sysfs_product,
            self.serial,
            self.usb_hub_port,
            self.sysfs_path,
            self.fw_version,
        )
    }
}

/// The tree of servo devices connected to a servo-host: the root servo plus
/// zero or more children under its hub.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServoTopology {
    pub root: Option<ServoTopologyItem>,
    pub children: Vec<ServoTopologyItem>,
}

impl ServoTopology {
    /// A topology is good iff the root exists and is itself good.
    pub fn is_good(&self) -> bool {
        self.root.as_ref().is_some_and(|r| r.is_good())
    }

    /// All devices in the topology (root first), optionally filtered to a
    /// single device type.
    pub fn devices(&self, filter: Option<&str>) -> Vec<&ServoTopologyItem> {
        let keep = |item: &&ServoTopologyItem| match filter {
            Some(board) => item.device_type == board,
            None => true,
        };
        self.root.iter().filter(keep).chain(self.children.iter().filter(keep)).collect()
    }
}
