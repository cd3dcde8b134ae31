// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Communication layer for servo recovery: an SSH command transport to
//! servo-hosts, a typed XML-RPC client to servod, sysfs topology discovery,
//! and firmware-update orchestration.
//!
//! Everything here is written against the [`Runner`] and [`Servod`]
//! capability traits so callers (and tests) can inject fakes above the SSH
//! layer.

mod error;
pub mod retry;
mod servod;
mod ssh;
pub mod topology;
mod tunnel;
pub mod updater;

pub use error::Cancelled;
pub use error::RunError;
pub use error::ServodError;
pub use error::TopologyError;
pub use error::TunnelError;
pub use error::UpdateError;
pub use servod::get_bool;
pub use servod::get_double;
pub use servod::get_int;
pub use servod::get_string;
pub use servod::Servod;
pub use servod::ServodClient;
pub use servod::DEFAULT_CALL_TIMEOUT;
pub use ssh::Runner;
pub use ssh::SshConfig;
pub use ssh::SshPool;
pub use ssh::SshRunner;
pub use tunnel::ForwardTunnel;

/// Minimum acceptable servod port. Ports at or below this value indicate a
/// misconfigured inventory record.
pub const MIN_SERVOD_PORT: u16 = 9000;
