// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Power-delivery and power-state recovery execs.

use crate::error::ExecError;
use crate::info::ExecInfo;
use futures::future::BoxFuture;
use futures::FutureExt;
use recovery_types::BatteryState;
use servo_comms::get_bool;
use servo_comms::get_int;
use servo_comms::get_string;
use servo_comms::retry;
use servo_comms::retry::RetryError;
use servo_comms::ServodError;
use servo_comms::topology;
use servo_comms::Servod;
use servod_protocol::Value;
use slog::info;
use slog::warn;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PD_ROLE_CONTROL: &str = "servo_pd_role";
const PD_ROLE_SNK: &str = "snk";
const PD_ROLE_SRC: &str = "src";

// Gap between EC UART commands.
const EC_UART_GAP: Duration = Duration::from_secs(1);

const BATTERY_FULL_CHARGE_CONTROL: &str = "battery_full_charge_mah";
const BATTERY_DESIGN_CAPACITY_CONTROL: &str = "battery_full_design_mah";
// Attempts to read each battery control before giving up.
const BATTERY_READ_ATTEMPTS: usize = 3;
// A battery holding less than this share of its design capacity at full
// charge is due for replacement.
const BATTERY_CHARGE_RATIO_MIN: f64 = 40.0;

fn retry_error(err: RetryError<ServodError>) -> ExecError {
    match err {
        RetryError::Exhausted { last, .. } => last.into(),
        RetryError::Cancelled(cancelled) => cancelled.into(),
    }
}

/// Force the PD role to sink and toggle it back to source, re-reading until
/// servod confirms the switch.
pub fn toggle_pd_role(info: &mut ExecInfo) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let args = info.action_args();
        let retry_count = args.as_int("retry_count", 1);
        let wait_in_retry =
            args.as_duration("wait_in_retry", 5, Duration::from_secs(1));
        let wait_before_retry =
            args.as_duration("wait_before_retry", 1, Duration::from_secs(1));
        let servod = info.new_servod().await?;
        let cancel = info.cancel();
        servod.set(cancel, PD_ROLE_CONTROL, Value::from(PD_ROLE_SNK)).await?;
        retry::sleep(cancel, wait_before_retry).await?;
        for attempt in 1..=retry_count {
            servod
                .set(cancel, PD_ROLE_CONTROL, Value::from(PD_ROLE_SRC))
                .await?;
            retry::sleep(cancel, wait_in_retry).await?;
            let role =
                get_string(servod.as_ref(), cancel, PD_ROLE_CONTROL).await?;
            if role == PD_ROLE_SRC {
                info!(
                    info.log(), "pd role switched to src";
                    "attempt" => attempt,
                );
                return Ok(());
            }
        }
        Err(ExecError::failed(format!(
            "pd role did not switch to src within {retry_count} attempts"
        )))
    }
    .boxed()
}

/// Send one EC UART command, flushing the console around it.
async fn set_ec_uart_cmd(
    servod: &dyn Servod,
    cancel: &CancellationToken,
    value: &str,
) -> Result<(), ExecError> {
    servod.set(cancel, "ec_uart_flush", Value::from("off")).await?;
    servod.set(cancel, "ec_uart_cmd", Value::from(value)).await?;
    servod.set(cancel, "ec_uart_flush", Value::from("on")).await?;
    Ok(())
}

/// Send an arbitrary `ec_uart_cmd` value, flushing the console around it.
pub fn set_ec_uart_command(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let args = info.action_args();
        let wait_timeout =
            args.as_duration("wait_timeout", 1, Duration::from_secs(1));
        let value = args.as_string("value", "");
        if value.is_empty() {
            return Err(ExecError::MissingArgument { arg: "value" });
        }
        let servod = info.new_servod().await?;
        let cancel = info.cancel();
        set_ec_uart_cmd(servod.as_ref(), cancel, &value).await?;
        retry::sleep(cancel, wait_timeout).await?;
        Ok(())
    }
    .boxed()
}

/// Check whether the DUT battery can still hold a charge, marking it for
/// replacement on the snapshot when its full-charge capacity has degraded
/// too far.
pub fn validate_battery_charging(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let servod = info.new_servod().await?;
        let cancel = info.cancel();
        let last_full_charge = retry::limit_count(
            cancel,
            BATTERY_READ_ATTEMPTS,
            Duration::ZERO,
            "read last full charge",
            info.log(),
            || get_int(servod.as_ref(), cancel, BATTERY_FULL_CHARGE_CONTROL),
        )
        .await
        .map_err(retry_error)?;
        let design_capacity = retry::limit_count(
            cancel,
            BATTERY_READ_ATTEMPTS,
            Duration::ZERO,
            "read design capacity",
            info.log(),
            || {
                get_int(
                    servod.as_ref(),
                    cancel,
                    BATTERY_DESIGN_CAPACITY_CONTROL,
                )
            },
        )
        .await
        .map_err(retry_error)?;
        if last_full_charge < 0 || design_capacity <= 0 {
            return Err(ExecError::failed(format!(
                "battery not detected: full charge {last_full_charge} mAh, \
                 design capacity {design_capacity} mAh"
            )));
        }
        let ratio = 100.0 * f64::from(last_full_charge)
            / f64::from(design_capacity);
        if ratio < BATTERY_CHARGE_RATIO_MIN {
            warn!(
                info.log(), "battery needs replacement";
                "charge_ratio" => ratio,
            );
            info.dut.battery_state = BatteryState::NeedsReplacement;
        } else {
            info!(info.log(), "battery is healthy"; "charge_ratio" => ratio);
            info.dut.battery_state = BatteryState::Normal;
        }
        Ok(())
    }
    .boxed()
}

/// Try to restore AC power detection by cycling the EC's PD dual-role
/// setting and resetting the power state.
pub fn recover_ac_power(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let wait_timeout = info.action_args().as_duration(
            "wait_timeout",
            5,
            Duration::from_secs(1),
        );
        let servod = info.new_servod().await?;
        let cancel = info.cancel();
        // ec_board being unreadable means the EC console is stuck; a power
        // state reset usually brings it back.
        if let Err(err) = get_string(servod.as_ref(), cancel, "ec_board").await
        {
            warn!(info.log(), "cannot read ec_board"; "err" => %err);
            servod.set(cancel, "power_state", Value::from("reset")).await?;
        }
        if get_bool(servod.as_ref(), cancel, "battery_is_charging").await? {
            return Ok(());
        }
        for value in
            ["pd dualrole off", "pd dualrole on", "pd dualrole source", "pd dualrole sink"]
        {
            set_ec_uart_cmd(servod.as_ref(), cancel, value).await?;
            retry::sleep(cancel, EC_UART_GAP).await?;
        }
        retry::sleep(cancel, wait_timeout).await?;
        servod.set(cancel, "power_state", Value::from("reset")).await?;
        if !get_bool(servod.as_ref(), cancel, "battery_is_charging").await? {
            return Err(ExecError::failed(
                "battery is still not charging after pd dual-role recovery"
                    .to_string(),
            ));
        }
        Ok(())
    }
    .boxed()
}

/// Repeatedly hit sysrq-x to force a kernel panic on a wedged DUT.
pub fn trigger_kernel_panic(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let args = info.action_args();
        let count = args.as_int("count", 3);
        let retry_interval =
            args.as_duration("retry_interval", 2, Duration::from_secs(1));
        let servod = info.new_servod().await?;
        let cancel = info.cancel();
        for _ in 0..count {
            servod.set(cancel, "sysrq_x", Value::from("tab")).await?;
            retry::sleep(cancel, retry_interval).await?;
        }
        Ok(())
    }
    .boxed()
}

/// Reboot the DUT through `power_state=reset` and confirm the EC console is
/// responsive again by reading `lid_open`.
pub fn power_state_reset(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let wait_timeout = info.action_args().as_duration(
            "wait_timeout",
            1,
            Duration::from_secs(1),
        );
        let servod = info.new_servod().await?;
        let cancel = info.cancel();
        servod.set(cancel, "power_state", Value::from("reset")).await?;
        retry::sleep(cancel, wait_timeout).await?;
        let lid_open =
            get_string(servod.as_ref(), cancel, "lid_open").await?;
        if lid_open != "yes" && lid_open != "not_applicable" {
            return Err(ExecError::failed(format!(
                "EC console is still unresponsive after reboot, lid_open is \
                 {lid_open:?}"
            )));
        }
        Ok(())
    }
    .boxed()
}

/// Power-cycle the root servo through a smart USB hub and verify it
/// re-enumerated by comparing devnums.
pub fn power_cycle_root_servo(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let args = info.action_args();
        let reset_timeout =
            args.as_duration("reset_timeout", 30, Duration::from_secs(1));
        let wait_timeout =
            args.as_duration("wait_timeout", 20, Duration::from_secs(1));
        let serial = info.servo()?.serial_number.clone();
        let runner = info.servo_host_runner()?;
        let pre_devnum =
            topology::servo_usb_devnum(runner.as_ref(), info.cancel(), &serial)
                .await?;
        info!(info.log(), "power-cycling root servo"; "devnum" => &pre_devnum);
        let command = format!("servodtool device -s {serial} power-cycle");
        if let Err(err) =
            runner.run(info.cancel(), reset_timeout, &command).await
        {
            // The hub the servo hangs off is not a smart one.
            info.servo_host_mut()?.smart_usbhub = false;
            return Err(ExecError::failed(format!(
                "failed to power-cycle servo {serial}: {err}"
            )));
        }
        info.servo_host_mut()?.smart_usbhub = true;
        retry::sleep(info.cancel(), wait_timeout).await?;
        let post_devnum =
            topology::servo_usb_devnum(runner.as_ref(), info.cancel(), &serial)
                .await?;
        if pre_devnum.is_empty() || post_devnum.is_empty() {
            info!(info.log(), "power cycle done but devnum is unverifiable");
        } else if pre_devnum != post_devnum {
            info!(
                info.log(), "root servo re-enumerated";
                "devnum" => &post_devnum,
            );
        } else {
            info!(info.log(), "power cycle done but devnum did not change");
        }
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
    async fn pd_toggle_retries_until_src() {
        let access = Arc::new(FakeAccess::default());
        access.servod.get_returns(
            PD_ROLE_CONTROL,
            vec![Value::from("snk"), Value::from("snk"), Value::from("src")],
        );
        let mut info = exec_info_with(
            dual_dut(),
            access.clone(),
            &["retry_count:5", "wait_in_retry:0", "wait_before_retry:0"],
        );
        toggle_pd_role(&mut info).await.unwrap();
        let calls = access.servod.calls();
        let snk_sets =
            calls.iter().filter(|c| *c == "set servo_pd_role snk").count();
        let src_sets =
            calls.iter().filter(|c| *c == "set servo_pd_role src").count();
        assert_eq!(snk_sets, 1);
        assert_eq!(src_sets, 3);
    }

    #[tokio::test]
    async fn pd_toggle_fails_when_role_never_switches() {
        let access = Arc::new(FakeAccess::default());
        access
            .servod
            .get_returns(PD_ROLE_CONTROL, vec![Value::from("snk")]);
        let mut info = exec_info_with(
            dual_dut(),
            access,
            &["retry_count:2", "wait_in_retry:0", "wait_before_retry:0"],
        );
        let err = toggle_pd_role(&mut info).await.unwrap_err();
        assert!(matches!(err, ExecError::Failed(_)), "{err}");
    }

    #[tokio::test]
    async fn ec_uart_command_flushes_around_the_write() {
        let access = Arc::new(FakeAccess::default());
        let mut info = exec_info_with(
            dual_dut(),
            access.clone(),
            &["value:pd dualrole on", "wait_timeout:0"],
        );
        set_ec_uart_command(&mut info).await.unwrap();
        assert_eq!(
            access.servod.calls(),
            [
                "set ec_uart_flush off",
                "set ec_uart_cmd pd dualrole on",
                "set ec_uart_flush on",
            ]
        );
    }

    #[tokio::test]
    async fn ec_uart_command_requires_a_value() {
        let access = Arc::new(FakeAccess::default());
        let mut info = exec_info_with(dual_dut(), access.clone(), &[]);
        let err = set_ec_uart_command(&mut info).await.unwrap_err();
        assert!(matches!(err, ExecError::MissingArgument { arg: "value" }));
        assert!(access.servod.calls().is_empty());
    }

    #[tokio::test]
    async fn battery_check_records_the_verdict() {
        let access = Arc::new(FakeAccess::default());
        access
            .servod
            .get_returns(BATTERY_FULL_CHARGE_CONTROL, vec![Value::Int(4100)]);
        access.servod.get_returns(
            BATTERY_DESIGN_CAPACITY_CONTROL,
            vec![Value::Int(5000)],
        );
        let mut info = exec_info_with(dual_dut(), access, &[]);
        validate_battery_charging(&mut info).await.unwrap();
        assert_eq!(info.dut.battery_state, BatteryState::Normal);
    }

    #[tokio::test]
    async fn degraded_battery_is_marked_for_replacement() {
        let access = Arc::new(FakeAccess::default());
        access
            .servod
            .get_returns(BATTERY_FULL_CHARGE_CONTROL, vec![Value::Int(1500)]);
        access.servod.get_returns(
            BATTERY_DESIGN_CAPACITY_CONTROL,
            vec![Value::Int(5000)],
        );
        let mut info = exec_info_with(dual_dut(), access, &[]);
        // A battery below the capacity threshold is a verdict, not an error.
        validate_battery_charging(&mut info).await.unwrap();
        assert_eq!(info.dut.battery_state, BatteryState::NeedsReplacement);
    }

    #[tokio::test]
    async fn unreadable_battery_controls_are_retried() {
        let access = Arc::new(FakeAccess::default());
        let mut info = exec_info_with(dual_dut(), access.clone(), &[]);
        let err = validate_battery_charging(&mut info).await.unwrap_err();
        assert!(matches!(err, ExecError::Servod(_)), "{err}");
        let reads = access
            .servod
            .calls()
            .iter()
            .filter(|c| *c == &format!("get {BATTERY_FULL_CHARGE_CONTROL}"))
            .count();
        assert_eq!(reads, 3);
        assert_eq!(info.dut.battery_state, BatteryState::Unknown);
    }

    #[tokio::test]
    async fn missing_battery_fails_the_check() {
        let access = Arc::new(FakeAccess::default());
        access
            .servod
            .get_returns(BATTERY_FULL_CHARGE_CONTROL, vec![Value::Int(0)]);
        access
            .servod
            .get_returns(BATTERY_DESIGN_CAPACITY_CONTROL, vec![Value::Int(0)]);
        let mut info = exec_info_with(dual_dut(), access, &[]);
        let err = validate_battery_charging(&mut info).await.unwrap_err();
        assert!(matches!(err, ExecError::Failed(_)), "{err}");
    }

    #[tokio::test]
    async fn ac_recovery_is_a_noop_when_already_charging() {
        let access = Arc::new(FakeAccess::default());
        access.servod.get_returns("ec_board", vec![Value::from("eve_ec")]);
        access
            .servod
            .get_returns("battery_is_charging", vec![Value::Bool(true)]);
        let mut info = exec_info_with(dual_dut(), access.clone(), &[]);
        recover_ac_power(&mut info).await.unwrap();
        assert!(!access
            .servod
            .calls()
            .iter()
            .any(|c| c.starts_with("set ec_uart_cmd")));
    }

    #[tokio::test]
    async fn kernel_panic_hits_sysrq_count_times() {
        let access = Arc::new(FakeAccess::default());
        let mut info = exec_info_with(
            dual_dut(),
            access.clone(),
            &["count:2", "retry_interval:0"],
        );
        trigger_kernel_panic(&mut info).await.unwrap();
        assert_eq!(
            access.servod.calls(),
            ["set sysrq_x tab", "set sysrq_x tab"]
        );
    }

    #[tokio::test]
    async fn power_state_reset_requires_responsive_ec() {
        let access = Arc::new(FakeAccess::default());
        access.servod.get_returns("lid_open", vec![Value::from("yes")]);
        let mut info =
            exec_info_with(dual_dut(), access, &["wait_timeout:0"]);
        power_state_reset(&mut info).await.unwrap();

        let access = Arc::new(FakeAccess::default());
        access.servod.get_returns("lid_open", vec![Value::from("no")]);
        let mut info =
            exec_info_with(dual_dut(), access, &["wait_timeout:0"]);
        let err = power_state_reset(&mut info).await.unwrap_err();
        assert!(matches!(err, ExecError::Failed(_)), "{err}");
    }

    const ROOT_PATH: &str = "/sys/bus/usb/devices/1-3.2.1";

    #[tokio::test]
    async fn power_cycle_records_smart_hub_presence() {
        let access = Arc::new(FakeAccess::default());
        access.runner.respond(
            "servodtool device -s SERVOV4P1_EX usb-path",
            ROOT_PATH,
        );
        access.runner.respond(&format!("cat {ROOT_PATH}/devnum"), "13");
        access.runner.respond(
            "servodtool device -s SERVOV4P1_EX power-cycle",
            "",
        );
        let mut info =
            exec_info_with(dual_dut(), access, &["wait_timeout:0"]);
        power_cycle_root_servo(&mut info).await.unwrap();
        assert!(info.servo_host().unwrap().smart_usbhub);
    }

    #[tokio::test]
    async fn power_cycle_failure_clears_smart_hub_flag() {
        let access = Arc::new(FakeAccess::default());
        access.runner.respond(
            "servodtool device -s SERVOV4P1_EX usb-path",
            ROOT_PATH,
        );
        access.runner.respond(&format!("cat {ROOT_PATH}/devnum"), "13");
        let mut dut = dual_dut();
        dut.servo_host.as_mut().unwrap().smart_usbhub = true;
        let mut info = exec_info_with(dut, access, &["wait_timeout:0"]);
        let err = power_cycle_root_servo(&mut info).await.unwrap_err();
        assert!(matches!(err, ExecError::Failed(_)), "{err}");
        assert!(!info.servo_host().unwrap().smart_usbhub);
    }
}
