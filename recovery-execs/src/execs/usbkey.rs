// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Execs for the USB key plugged into the servo: presence detection and a
//! destructive read/write audit.

use crate::error::ExecError;
use crate::info::ExecInfo;
use futures::future::BoxFuture;
use futures::FutureExt;
use recovery_types::UsbkeyState;
use servo_comms::get_string;
use servo_comms::retry;
use servo_comms::RunError;
use servo_comms::Runner;
use servod_protocol::Value;
use slog::debug;
use slog::info;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DETECT_TIMEOUT: Duration = Duration::from_secs(60);
const REACHABLE_TIMEOUT: Duration = Duration::from_secs(15);
const DEVICE_TYPE_TIMEOUT: Duration = Duration::from_secs(60);

// badblocks over a whole stick takes a while.
const AUDIT_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

// Wait for the key to settle after switching the mux.
const MUX_SETTLE: Duration = Duration::from_secs(5);

const USBKEY_DEV_CONTROL: &str = "image_usbkey_dev";

/// Verify servod reports a USB key and the servo-host can address it as a
/// block device. Updates the usbkey state on the snapshot either way.
pub fn detect_usbkey(info: &mut ExecInfo) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let servod = info.new_servod().await?;
        let path =
            match get_string(servod.as_ref(), info.cancel(), USBKEY_DEV_CONTROL)
                .await
            {
                Ok(path) if !path.trim().is_empty() => {
                    path.trim().to_string()
                }
                Ok(_) | Err(_) => {
                    info.servo_host_mut()?.usbkey_state =
                        UsbkeyState::NotDetected;
                    return Err(ExecError::failed(
                        "servod reports no USB key device".to_string(),
                    ));
                }
            };
        let runner = info.servo_host_runner()?;
        if let Err(err) = runner
            .run(info.cancel(), DETECT_TIMEOUT, &format!("fdisk -l {path}"))
            .await
        {
            info.servo_host_mut()?.usbkey_state = UsbkeyState::NotDetected;
            return Err(ExecError::failed(format!(
                "USB key {path} is not readable from the servo-host: {err}"
            )));
        }
        // Detection does not clear a replacement verdict from an audit.
        let state = &mut info.servo_host_mut()?.usbkey_state;
        if *state != UsbkeyState::NeedsReplacement {
            *state = UsbkeyState::Normal;
        }
        Ok(())
    }
    .boxed()
}

/// Point the USB key at the DUT and find which /dev/sdX it shows up as.
async fn usb_drive_path_on_dut(
    info: &ExecInfo,
    dut_runner: &dyn Runner,
) -> Result<String, ExecError> {
    let servod = info.new_servod().await?;
    servod
        .set(
            info.cancel(),
            "image_usbkey_direction",
            Value::from("dut_sees_usbkey"),
        )
        .await?;
    retry::sleep(info.cancel(), MUX_SETTLE).await?;
    let listing = dut_runner
        .run(info.cancel(), DETECT_TIMEOUT, "ls /dev/sd[a-z]")
        .await?;
    for device in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let command = format!(
            ". /usr/share/misc/chromeos-common.sh; get_device_type {device}"
        );
        let device_type = match dut_runner
            .run(info.cancel(), DEVICE_TYPE_TIMEOUT, &command)
            .await
        {
            Ok(out) => out,
            Err(err) => {
                debug!(info.log(), "classify block device"; "err" => %err);
                continue;
            }
        };
        if device_type.trim() != "USB" {
            continue;
        }
        if dut_runner
            .run(info.cancel(), DETECT_TIMEOUT, &format!("fdisk -l {device}"))
            .await
            .is_ok()
        {
            return Ok(device.to_string());
        }
    }
    Err(ExecError::failed(
        "no USB drive visible from the DUT".to_string(),
    ))
}

/// Destructive badblocks pass over the key. Empty output means the stick is
/// healthy; bad blocks or a mid-run failure condemn it.
async fn check_usb_drive(
    runner: &dyn Runner,
    cancel: &CancellationToken,
    path: &str,
) -> Result<UsbkeyState, ExecError> {
    let command = format!("badblocks -w -e 100 -b 4096 -t random {path}");
    match runner.run(cancel, AUDIT_TIMEOUT, &command).await {
        Ok(out) if out.trim().is_empty() => Ok(UsbkeyState::Normal),
        Ok(_) => Ok(UsbkeyState::NeedsReplacement),
        // 124/127 mean badblocks never really ran; so does our own timeout.
        Err(err) if matches!(err.exit_status(), Some(124) | Some(127)) => {
            Err(err.into())
        }
        Err(RunError::Timeout { command, host, timeout }) => {
            Err(RunError::Timeout { command, host, timeout }.into())
        }
        Err(RunError::Cancelled(c)) => Err(c.into()),
        Err(_) => Ok(UsbkeyState::NeedsReplacement),
    }
}

/// Audit the USB key with badblocks, preferring to run it from the DUT so
/// the mux and cabling are exercised too.
pub fn audit_usbkey(info: &mut ExecInfo) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let dut_name = info.dut.name.clone();
        let dut_runner = info.new_runner(&dut_name);
        let dut_reachable = dut_runner
            .run(info.cancel(), REACHABLE_TIMEOUT, "true")
            .await
            .is_ok();
        if dut_reachable {
            match usb_drive_path_on_dut(info, dut_runner.as_ref()).await {
                Ok(path) => {
                    info!(
                        info.log(), "auditing USB key from the DUT";
                        "path" => &path,
                    );
                    let state = check_usb_drive(
                        dut_runner.as_ref(),
                        info.cancel(),
                        &path,
                    )
                    .await?;
                    info.servo_host_mut()?.usbkey_state = state;
                    return Ok(());
                }
                // Not critical, the servo-host side path still works.
                Err(err) => {
                    debug!(info.log(), "usb key not visible from DUT"; "err" => %err);
                }
            }
        }
        let servod = info.new_servod().await?;
        let path =
            get_string(servod.as_ref(), info.cancel(), USBKEY_DEV_CONTROL)
                .await?;
        let path = path.trim().to_string();
        if path.is_empty() {
            info.servo_host_mut()?.usbkey_state = UsbkeyState::NotDetected;
            return Err(ExecError::failed(
                "servod reports no USB key device".to_string(),
            ));
        }
        let runner = info.servo_host_runner()?;
        let state = check_usb_drive(runner.as_ref(), info.cancel(), &path).await?;
        info.servo_host_mut()?.usbkey_state = state;
        Ok(())
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::dual_dut;
    use crate::testutil::exec_info_with;
    use crate::testutil::FakeAccess;
    use std::sync::Arc;

    #[tokio::test]
    async fn detect_marks_normal_when_host_sees_the_key() {
        let access = Arc::new(FakeAccess::default());
        access
            .servod
            .get_returns(USBKEY_DEV_CONTROL, vec![Value::from("/dev/sdb")]);
        access.runner.respond("fdisk -l /dev/sdb", "Disk /dev/sdb: 16 GiB");
        let mut info = exec_info_with(dual_dut(), access, &[]);
        detect_usbkey(&mut info).await.unwrap();
        assert_eq!(
            info.servo_host().unwrap().usbkey_state,
            UsbkeyState::Normal
        );
    }

    #[tokio::test]
    async fn detect_preserves_replacement_verdict() {
        let access = Arc::new(FakeAccess::default());
        access
            .servod
            .get_returns(USBKEY_DEV_CONTROL, vec![Value::from("/dev/sdb")]);
        access.runner.respond("fdisk -l /dev/sdb", "Disk /dev/sdb: 16 GiB");
        let mut dut = dual_dut();
        dut.servo_host.as_mut().unwrap().usbkey_state =
            UsbkeyState::NeedsReplacement;
        let mut info = exec_info_with(dut, access, &[]);
        detect_usbkey(&mut info).await.unwrap();
        assert_eq!(
            info.servo_host().unwrap().usbkey_state,
            UsbkeyState::NeedsReplacement
        );
    }

    #[tokio::test]
    async fn detect_marks_not_detected_when_servod_has_no_path() {
        let access = Arc::new(FakeAccess::default());
        access.servod.get_returns(USBKEY_DEV_CONTROL, vec![Value::from("")]);
        let mut info = exec_info_with(dual_dut(), access, &[]);
        assert!(detect_usbkey(&mut info).await.is_err());
        assert_eq!(
            info.servo_host().unwrap().usbkey_state,
            UsbkeyState::NotDetected
        );
    }

    #[tokio::test]
    async fn detect_marks_not_detected_when_host_cannot_read_it() {
        let access = Arc::new(FakeAccess::default());
        access
            .servod
            .get_returns(USBKEY_DEV_CONTROL, vec![Value::from("/dev/sdb")]);
        let mut info = exec_info_with(dual_dut(), access, &[]);
        assert!(detect_usbkey(&mut info).await.is_err());
        assert_eq!(
            info.servo_host().unwrap().usbkey_state,
            UsbkeyState::NotDetected
        );
    }

    #[tokio::test]
    async fn audit_falls_back_to_servo_host_when_dut_is_down() {
        let access = Arc::new(FakeAccess::default());
        // "true" is unscripted, so the DUT looks unreachable and the audit
        // runs from the servo-host.
        access
            .servod
            .get_returns(USBKEY_DEV_CONTROL, vec![Value::from("/dev/sdb")]);
        access
            .runner
            .respond("badblocks -w -e 100 -b 4096 -t random /dev/sdb", "");
        let mut info = exec_info_with(dual_dut(), access.clone(), &[]);
        audit_usbkey(&mut info).await.unwrap();
        assert_eq!(
            info.servo_host().unwrap().usbkey_state,
            UsbkeyState::Normal
        );
    }

    #[tokio::test]
    async fn audit_condemns_key_with_bad_blocks() {
        let access = Arc::new(FakeAccess::default());
        access
            .servod
            .get_returns(USBKEY_DEV_CONTROL, vec![Value::from("/dev/sdb")]);
        access.runner.respond(
            "badblocks -w -e 100 -b 4096 -t random /dev/sdb",
            "1024\n2048\n",
        );
        let mut info = exec_info_with(dual_dut(), access, &[]);
        audit_usbkey(&mut info).await.unwrap();
        assert_eq!(
            info.servo_host().unwrap().usbkey_state,
            UsbkeyState::NeedsReplacement
        );
    }

    #[tokio::test]
    async fn check_condemns_key_when_badblocks_itself_fails() {
        // Unscripted command fails with status 1, which is a media verdict,
        // not an infrastructure problem.
        let access = Arc::new(FakeAccess::default());
        let state = check_usb_drive(
            access.runner.as_ref() as &dyn Runner,
            &CancellationToken::new(),
            "/dev/sdb",
        )
        .await
        .unwrap();
        assert_eq!(state, UsbkeyState::NeedsReplacement);
    }
}
