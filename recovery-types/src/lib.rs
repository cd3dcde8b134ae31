// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared data model for the servo recovery tooling.
//!
//! The types here describe a single device-under-test (DUT) snapshot: the
//! servo-host it is wired to, the servo attached to that host, and the USB
//! topology of servo devices discovered under the root servo's hub. The
//! recovery engine owns a snapshot for the duration of a plan; execs receive
//! an exclusive borrow for the duration of one call.

mod dut;
mod servo_type;
mod state;
mod topology;

pub use dut::Dut;
pub use dut::Servo;
pub use dut::ServoHost;
pub use dut::StableVersion;
pub use dut::ATTR_POOLS;
pub use dut::ATTR_SERVO_SETUP;
pub use dut::SERVO_SETUP_DUAL;
pub use servo_type::ServoType;
pub use state::BatteryState;
pub use state::FirmwareChannel;
pub use state::ServoState;
pub use state::UnknownServoState;
pub use state::UsbkeyState;
pub use topology::ServoTopology;
pub use topology::ServoTopologyItem;

/// Servo device type names as they appear in `servo_type` descriptors and in
/// topology items classified from sysfs VID:PID pairs.
pub mod device {
    pub const SERVO_V3: &str = "servo_v3";
    pub const SERVO_V4: &str = "servo_v4";
    pub const SERVO_V4P1: &str = "servo_v4p1";
    pub const CCD_CR50: &str = "ccd_cr50";
    pub const CCD_GSC: &str = "ccd_gsc";
    pub const SERVO_MICRO: &str = "servo_micro";
    pub const C2D2: &str = "c2d2";
    pub const SWEETBERRY: &str = "sweetberry";
}
