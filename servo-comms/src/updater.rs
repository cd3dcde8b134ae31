// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Firmware updates for servo devices via `servo_updater` on the servo-host
//! (or its containerized equivalent).
//!
//! Updates are applied per device, with a bounded number of attempts and an
//! optional single forced retry. Output messages matching a known updater
//! issue abort all further attempts for that device, since retrying cannot
//! clear those conditions.

use crate::error::Cancelled;
use crate::error::UpdateError;
use crate::retry;
use crate::ssh::Runner;
use crate::topology;
use recovery_types::device;
use recovery_types::FirmwareChannel;
use recovery_types::ServoTopologyItem;
use slog::debug;
use slog::info;
use slog::Logger;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Max time allowed for one firmware update command.
const FW_UPDATER_TIMEOUT: Duration = Duration::from_secs(2 * 60);

const LATEST_VERSION_TIMEOUT: Duration = Duration::from_secs(60);
const KILL_UPDATERS_TIMEOUT: Duration = Duration::from_secs(30);

// The configuration file takes a moment to repopulate after an update.
const FW_REREAD_ATTEMPTS: usize = 3;
const FW_REREAD_DELAY: Duration = Duration::from_secs(1);

/// Servo device types whose firmware `servo_updater` can flash.
pub const UPDATABLE_DEVICES: &[&str] = &[
    device::SERVO_V4,
    device::SERVO_V4P1,
    device::SERVO_MICRO,
    device::C2D2,
    device::SWEETBERRY,
];

/// Known updater output fragments that indicate a condition retries cannot
/// clear.
pub const UPDATER_ISSUE_MESSAGES: &[&str] = &["Configuration not set"];

/// Parameters for an update pass over a servo topology.
#[derive(Debug, Clone, Default)]
pub struct FwUpdateRequest {
    /// The servo-host runs servod in a container.
    pub use_container: bool,
    /// Firmware channel to flash from.
    pub channel: FirmwareChannel,
    /// Attempts per device before giving up (minimum 1).
    pub try_attempt_count: usize,
    /// After all plain attempts fail, try once more with `--force`.
    pub try_force_update_after_fail: bool,
    /// Pass `--force` on every attempt.
    pub force_update: bool,
    /// Flash without comparing current and latest versions.
    pub ignore_version: bool,
}

fn is_updatable(device_type: &str) -> bool {
    UPDATABLE_DEVICES.contains(&device_type)
}

/// Latest available firmware version for `board` on `channel`, per the
/// updater's own catalog. Returns an empty string when the version cannot be
/// determined, which any comparison then treats as a mismatch.
pub async fn latest_version_from_updater(
    runner: &dyn Runner,
    cancel: &CancellationToken,
    channel: FirmwareChannel,
    board: &str,
    log: &Logger,
) -> String {
    let command =
        format!("servo_updater -p -b \"{board}\" -c {channel} | grep firmware");
    match runner.run(cancel, LATEST_VERSION_TIMEOUT, &command).await {
        Ok(output) => {
            // Expected shape is `firmware: servo_v4_v2.4.58-c37246f9c`.
            let parts: Vec<&str> = output.split(':').collect();
            if parts.len() == 2 {
                return parts[1].trim().to_string();
            }
            debug!(log, "unexpected servo_updater output"; "output" => output);
        }
        Err(err) => {
            debug!(log, "failed to read latest firmware version"; "err" => %err);
        }
    }
    String::new()
}

/// Whether `item` requires a firmware update on `channel`. Devices outside
/// the updatable set never do; an empty or mismatched current version does.
pub async fn needs_update(
    runner: &dyn Runner,
    cancel: &CancellationToken,
    item: &ServoTopologyItem,
    channel: FirmwareChannel,
    log: &Logger,
) -> bool {
    if !is_updatable(&item.device_type) {
        debug!(
            log, "device type cannot be updated";
            "device_type" => &item.device_type,
        );
        return false;
    }
    if item.fw_version.is_empty() {
        return true;
    }
    let latest =
        latest_version_from_updater(runner, cancel, channel, &item.device_type, log)
            .await;
    if item.fw_version != latest {
        info!(
            log, "firmware version mismatch";
            "device_type" => &item.device_type,
            "current" => &item.fw_version,
            "latest" => &latest,
        );
        return true;
    }
    false
}

fn update_command(
    use_container: bool,
    item: &ServoTopologyItem,
    force: bool,
    channel: FirmwareChannel,
) -> String {
    let tail = format!(
        "-b {} -s {} -c {} --reboot",
        item.device_type, item.serial, channel
    );
    let mut command = if use_container {
        format!("python /update_servo_firmware.py {tail}")
    } else {
        format!("servo_updater {tail}")
    };
    if force {
        command.push_str(" --force");
    }
    command
}

/// Kill any `servo_updater` processes still holding the device with the
/// given serial.
pub async fn kill_active_updaters(
    runner: &dyn Runner,
    cancel: &CancellationToken,
    serial: &str,
) -> Result<(), UpdateError> {
    let command = format!(
        "ps aux | grep -ie [s]ervo_updater |grep \"{serial}\" | awk '{{print $2}}' | xargs kill -9"
    );
    runner.run(cancel, KILL_UPDATERS_TIMEOUT, &command).await?;
    Ok(())
}

/// Run the update command for one device, skipping it when no update is
/// needed. Stale updater processes are killed afterwards on plain hosts.
async fn update_device_fw(
    runner: &dyn Runner,
    cancel: &CancellationToken,
    item: &ServoTopologyItem,
    req: &FwUpdateRequest,
    force: bool,
    log: &Logger,
) -> Result<(), UpdateError> {
    if req.ignore_version {
        debug!(
            log, "firmware version check skipped by request";
            "device_type" => &item.device_type,
        );
    } else if !needs_update(runner, cancel, item, req.channel, log).await {
        debug!(
            log, "device does not need an update";
            "device_type" => &item.device_type,
        );
        return Ok(());
    }
    let command = update_command(req.use_container, item, force, req.channel);
    debug!(
        log, "updating servo firmware";
        "device_type" => &item.device_type,
        "force" => force,
    );
    let result = runner.run(cancel, FW_UPDATER_TIMEOUT, &command).await;
    if !req.use_container {
        if let Err(err) = kill_active_updaters(runner, cancel, &item.serial).await
        {
            debug!(log, "failed to kill active updater processes"; "err" => %err);
        }
    }
    match result {
        Ok(output) => {
            debug!(
                log, "servo firmware update finished";
                "device_type" => &item.device_type,
                "output" => output,
            );
            Ok(())
        }
        Err(err) => {
            let message = err.to_string();
            if UPDATER_ISSUE_MESSAGES.iter().any(|m| message.contains(m)) {
                Err(UpdateError::UpdaterIssue { message })
            } else {
                Err(UpdateError::Run(err))
            }
        }
    }
}

/// One full update attempt for `item`: flash, re-read the firmware version
/// from sysfs, and verify the device no longer needs an update.
async fn run_update_attempt(
    runner: &dyn Runner,
    cancel: &CancellationToken,
    item: &mut ServoTopologyItem,
    req: &FwUpdateRequest,
    force: bool,
    log: &Logger,
) -> Result<(), UpdateError> {
    if let Err(err) =
        update_device_fw(runner, cancel, item, req, force, log).await
    {
        if matches!(err, UpdateError::UpdaterIssue { .. }) {
            return Err(err);
        }
        // Not yet fatal; the version re-read and check below decide.
        debug!(
            log, "firmware update command failed";
            "device_type" => &item.device_type,
            "err" => %err,
        );
    }
    let mut reread = Ok(());
    for attempt in 1..=FW_REREAD_ATTEMPTS {
        match topology::reread_fw_version(runner, cancel, item).await {
            Ok(()) => {
                reread = Ok(());
                break;
            }
            Err(err) => {
                debug!(
                    log, "failed to re-read firmware version";
                    "device_type" => &item.device_type,
                    "attempt" => attempt,
                    "err" => %err,
                );
                reread = Err(err);
                if attempt < FW_REREAD_ATTEMPTS {
                    retry::sleep(cancel, FW_REREAD_DELAY).await?;
                }
            }
        }
    }
    if let Err(err) = reread {
        return Err(UpdateError::RereadVersion {
            device_type: item.device_type.clone(),
            err,
        });
    }
    if req.ignore_version
        || !needs_update(runner, cancel, item, req.channel, log).await
    {
        info!(
            log, "servo firmware updated";
            "device_type" => &item.device_type,
        );
        return Ok(());
    }
    Err(UpdateError::StillOutdated {
        device_type: item.device_type.clone(),
    })
}

/// Update every updatable device in `devices`, in place. Items missing
/// required data or outside the updatable set are skipped. Returns the
/// device types that could not be brought up to date.
pub async fn update_devices_fw(
    runner: &dyn Runner,
    cancel: &CancellationToken,
    req: &FwUpdateRequest,
    devices: &mut [ServoTopologyItem],
    log: &Logger,
) -> Result<Vec<String>, Cancelled> {
    let mut failed = Vec::new();
    for item in devices.iter_mut() {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        if !item.is_good() {
            debug!(
                log, "device is missing data required for an update";
                "item" => %item,
            );
            continue;
        }
        if !is_updatable(&item.device_type) {
            debug!(
                log, "device type does not support firmware updates";
                "device_type" => &item.device_type,
            );
            continue;
        }
        let attempts = req.try_attempt_count.max(1);
        let mut updated = false;
        let mut fatal = false;
        for attempt in 1..=attempts {
            match run_update_attempt(
                runner,
                cancel,
                item,
                req,
                req.force_update,
                log,
            )
            .await
            {
                Ok(()) => {
                    updated = true;
                    break;
                }
                Err(UpdateError::Cancelled(err)) => return Err(err),
                Err(err @ UpdateError::UpdaterIssue { .. }) => {
                    info!(
                        log, "known updater issue, not retrying";
                        "device_type" => &item.device_type,
                        "err" => %err,
                    );
                    fatal = true;
                    break;
                }
                Err(err) => {
                    debug!(
                        log, "firmware update attempt failed";
                        "device_type" => &item.device_type,
                        "attempt" => attempt,
                        "err" => %err,
                    );
                }
            }
        }
        if !updated && !fatal && req.try_force_update_after_fail {
            match run_update_attempt(runner, cancel, item, req, true, log).await
            {
                Ok(()) => {
                    info!(
                        log, "servo firmware force-updated";
                        "device_type" => &item.device_type,
                    );
                    updated = true;
                }
                Err(UpdateError::Cancelled(err)) => return Err(err),
                Err(err) => {
                    debug!(
                        log, "forced firmware update failed";
                        "device_type" => &item.device_type,
                        "err" => %err,
                    );
                }
            }
        }
        if !updated {
            info!(
                log, "failed to update servo firmware";
                "device_type" => &item.device_type,
            );
            failed.push(item.device_type.clone());
        }
    }
    Ok(failed)
}
