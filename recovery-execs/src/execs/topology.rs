// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Execs that validate the servo's USB topology as seen from the
//! servo-host's sysfs.

use crate::error::ExecError;
use crate::info::ExecInfo;
use futures::future::BoxFuture;
use futures::FutureExt;
use servo_comms::topology;
use slog::debug;
use slog::info;

/// Re-read the topology from sysfs and check it is complete: a root servo
/// plus at least `min_child` children (dual setups require two).
pub fn topology_update(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let args = info.action_args();
        let min_child = args.as_int("min_child", 1);
        let persist = args.as_bool("persist_topology", false);
        let serial = info.servo()?.serial_number.clone();
        let runner = info.servo_host_runner()?;
        let topology = topology::retrieve_servo_topology(
            runner.as_ref(),
            info.cancel(),
            &serial,
            info.log(),
        )
        .await?;
        if topology.root.is_none() {
            return Err(ExecError::failed(format!(
                "root servo {serial:?} not found in sysfs"
            )));
        }
        let children = topology.children.len() as i64;
        if children < min_child {
            return Err(ExecError::failed(format!(
                "topology has {children} child devices, expected at least \
                 {min_child}"
            )));
        }
        info!(
            info.log(), "servo topology is complete";
            "children" => children,
        );
        if persist {
            info.servo_host_mut()?.servo_topology = Some(topology);
        }
        Ok(())
    }
    .boxed()
}

/// Verify the root servo (v4 or v4p1) is present and fully readable.
pub fn root_present(info: &mut ExecInfo) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        if info.action_args().as_bool("update_topology", false) {
            let serial = info.servo()?.serial_number.clone();
            let runner = info.servo_host_runner()?;
            let topology = topology::retrieve_servo_topology(
                runner.as_ref(),
                info.cancel(),
                &serial,
                info.log(),
            )
            .await?;
            info.servo_host_mut()?.servo_topology = Some(topology);
        }
        let serial = info.servo()?.serial_number.clone();
        let runner = info.servo_host_runner()?;
        let root = topology::root_servo(
            runner.as_ref(),
            info.cancel(),
            &serial,
            info.log(),
        )
        .await?;
        debug!(info.log(), "root servo"; "item" => %root);
        if !root.is_good() {
            return Err(ExecError::failed(format!(
                "root servo {serial:?} is missing device data: {root}"
            )));
        }
        Ok(())
    }
    .boxed()
}
