// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The exec implementations, grouped by concern. Canonical names are bound
//! in [`crate::standard_registry`].

pub mod control;
pub mod cr50;
pub mod firmware;
pub mod logs;
pub mod power;
pub mod servod_host;
pub mod state;
pub mod topology;
pub mod usbkey;
