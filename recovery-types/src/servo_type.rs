// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structured view of a servod `servo_type` descriptor string.
//!
//! The grammar is `device(_with_device(_and_device)*)?`: the part before
//! `_with_` names the base board plugged into the servo-host, and the part
//! after it names the device(s) actually wired to the DUT. A dual setup has
//! two children joined by `_and_`.

use crate::device;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServoType {
    descriptor: String,
}

impl ServoType {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self { descriptor: descriptor.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.descriptor
    }

    /// The base board: everything before `_with_`.
    pub fn base(&self) -> &str {
        self.descriptor.splitn(2, "_with_").next().unwrap_or("")
    }

    /// The devices connected to the DUT, in declaration order. Empty when
    /// the descriptor has no `_with_` part.
    pub fn children(&self) -> Vec<&str> {
        match self.descriptor.splitn(2, "_with_").nth(1) {
            Some(rest) => rest.split("_and_").collect(),
            None => Vec::new(),
        }
    }

    /// The device servod talks to the DUT through: the first child if any
    /// child is present, otherwise the base string itself.
    pub fn main_device(&self) -> &str {
        self.children().first().copied().unwrap_or_else(|| self.base())
    }

    pub fn is_v3(&self) -> bool {
        self.descriptor.contains(device::SERVO_V3)
    }

    /// True for both `servo_v4` and `servo_v4p1` bases.
    pub fn is_v4(&self) -> bool {
        self.base().starts_with(device::SERVO_V4)
    }

    /// A dual setup carries two child devices.
    pub fn is_dual(&self) -> bool {
        self.children().len() == 2
    }

    pub fn is_micro(&self) -> bool {
        self.main_device().contains(device::SERVO_MICRO)
    }

    pub fn is_ccd(&self) -> bool {
        self.main_device().starts_with("ccd_")
    }

    pub fn is_main_ccd_cr50_or_gsc(&self) -> bool {
        let main = self.main_device();
        main == device::CCD_CR50 || main == device::CCD_GSC
    }
}

impl fmt::Display for ServoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor)
    }
}

impl From<&str> for ServoType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
