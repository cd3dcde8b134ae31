// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Servo firmware execs: the dry-run staleness check and the full update
//! pass over the topology.

use crate::error::ExecError;
use crate::info::ExecInfo;
use futures::future::BoxFuture;
use futures::FutureExt;
use recovery_types::ServoState;
use recovery_types::ServoTopologyItem;
use servo_comms::topology;
use servo_comms::updater;
use servo_comms::updater::FwUpdateRequest;
use slog::debug;
use slog::info;

/// Devices to consider for firmware work: the persisted topology when an
/// earlier exec cached one, otherwise a fresh sysfs enumeration.
async fn devices_for_update(
    info: &ExecInfo,
    board_filter: &str,
) -> Result<Vec<ServoTopologyItem>, ExecError> {
    let host = info.servo_host()?;
    if let Some(cached) = &host.servo_topology {
        let filter = (!board_filter.is_empty()).then_some(board_filter);
        return Ok(cached.devices(filter).into_iter().cloned().collect());
    }
    let serial = info.servo()?.serial_number.clone();
    let runner = info.servo_host_runner()?;
    let devices = topology::list_of_devices(
        runner.as_ref(),
        info.cancel(),
        &serial,
        info.log(),
    )
    .await?;
    Ok(devices
        .into_iter()
        .filter(|d| board_filter.is_empty() || d.device_type == board_filter)
        .collect())
}

/// Fail when any servo device's firmware is behind its channel's latest.
pub fn fw_need_update(info: &mut ExecInfo) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let channel = info.servo()?.firmware_channel;
        let devices = devices_for_update(info, "").await?;
        let runner = info.servo_host_runner()?;
        let mut outdated = Vec::new();
        for device in &devices {
            if !device.is_good() {
                debug!(info.log(), "skipping incomplete device"; "item" => %device);
                continue;
            }
            if updater::needs_update(
                runner.as_ref(),
                info.cancel(),
                device,
                channel,
                info.log(),
            )
            .await
            {
                outdated.push(device.device_type.clone());
            }
        }
        if !outdated.is_empty() {
            return Err(ExecError::failed(format!(
                "servo devices need a firmware update: {}",
                outdated.join(", ")
            )));
        }
        Ok(())
    }
    .boxed()
}

/// Flash every updatable servo device, driven by action arguments mirroring
/// the updater request. A device that stays outdated after all attempts
/// condemns the servo.
pub fn update_servo_firmware(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let args = info.action_args();
        let mut try_attempt_count =
            args.as_int("try_attempt_count", 1).max(1) as usize;
        let mut try_force_update_after_fail =
            args.as_bool("try_force_update_after_fail", false);
        let force_update = args.as_bool("force_update", false);
        let ignore_version = args.as_bool("ignore_version", false);
        let board_filter = args.as_string("servo_board", "");
        if force_update {
            // Force flashes unconditionally, so one attempt is enough.
            try_attempt_count = 1;
            try_force_update_after_fail = false;
        }
        let req = FwUpdateRequest {
            use_container: info.servo_host()?.is_containerized(),
            channel: info.servo()?.firmware_channel,
            try_attempt_count,
            try_force_update_after_fail,
            force_update,
            ignore_version,
        };
        let mut devices = devices_for_update(info, &board_filter).await?;
        if devices.is_empty() {
            return Err(ExecError::failed(
                "no servo devices to update".to_string(),
            ));
        }
        let runner = info.servo_host_runner()?;
        let failed = updater::update_devices_fw(
            runner.as_ref(),
            info.cancel(),
            &req,
            &mut devices,
            info.log(),
        )
        .await?;
        // Flashing rewrites fw versions; push them back into the cache.
        if let Some(cached) = &mut info.servo_host_mut()?.servo_topology {
            let items = cached
                .root
                .iter_mut()
                .chain(cached.children.iter_mut());
            for item in items {
                if let Some(updated) =
                    devices.iter().find(|d| d.serial == item.serial)
                {
                    item.fw_version = updated.fw_version.clone();
                }
            }
        }
        if !failed.is_empty() {
            info.servo_mut()?.state = ServoState::NeedReplacement;
            return Err(ExecError::failed(format!(
                "{} servo devices failed the update process: {}",
                failed.len(),
                failed.join(", ")
            )));
        }
        info!(info.log(), "servo firmware is up to date");
        Ok(())
    }
    .boxed()
}
