// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The recovery exec library: named, self-contained repair and verification
//! actions the recovery engine dispatches against a DUT snapshot.
//!
//! An exec receives an [`ExecInfo`] holding exclusive access to the snapshot
//! plus factories for the transports it needs (SSH runners, a servod
//! facade), runs to completion or first error, and leaves any state it
//! changed on the snapshot. Execs are looked up by canonical name in a
//! [`Registry`] built once at program entry.

mod args;
mod error;
mod info;
mod registry;

pub mod execs;

#[cfg(test)]
pub(crate) mod testutil;

pub use args::ActionArgs;
pub use args::DEFAULT_SPLIT_TOKEN;
pub use error::AccessError;
pub use error::ExecError;
pub use error::ExecFailure;
pub use info::Access;
pub use info::ExecInfo;
pub use info::ServodOptions;
pub use registry::standard_registry;
pub use registry::ExecFn;
pub use registry::Registry;
pub use registry::RegistryBuilder;
