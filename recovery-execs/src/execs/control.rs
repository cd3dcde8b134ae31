// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Generic servod control execs: reads, writes, and comparisons driven
//! entirely by action arguments.

use crate::error::ExecError;
use crate::info::ExecInfo;
use futures::future::BoxFuture;
use futures::FutureExt;
use servo_comms::get_bool;
use servo_comms::get_double;
use servo_comms::get_int;
use servo_comms::get_string;
use servo_comms::retry;
use servo_comms::Servod;
use servod_protocol::Value;
use slog::debug;
use slog::info;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const COMMAND_ARG: &str = "command";

// Bus voltage on ppdut5 below this means the DUT is likely not connected.
const MIN_PPDUT5_MV_WHEN_CONNECTED: f64 = 500.0;

const PPDUT5_CONTROL: &str = "ppdut5_mv";

// Uart command controls differ between servo v4 and v4p1.
const UART_V4_CONTROL: &str = "servo_v4_uart_cmd";
const UART_V4P1_CONTROL: &str = "servo_v4p1_uart_cmd";

/// Set the control named by `command` to `string_value`.
pub fn servo_set(info: &mut ExecInfo) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let command = info.action_args().as_string(COMMAND_ARG, "");
        if command.is_empty() {
            return Err(ExecError::MissingArgument { arg: COMMAND_ARG });
        }
        let value = info.action_args().as_string("string_value", "");
        if value.is_empty() {
            return Err(ExecError::MissingArgument { arg: "string_value" });
        }
        let servod = info.new_servod().await?;
        servod.set(info.cancel(), &command, Value::from(value)).await?;
        Ok(())
    }
    .boxed()
}

/// Verify the DUT is connected to the servo via the `ppdut5_mv` control.
pub fn low_ppdut5(info: &mut ExecInfo) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let servod = info.new_servod().await?;
        servod.has(info.cancel(), PPDUT5_CONTROL).await?;
        let voltage =
            get_double(servod.as_ref(), info.cancel(), PPDUT5_CONTROL).await?;
        if voltage < MIN_PPDUT5_MV_WHEN_CONNECTED {
            return Err(ExecError::failed(format!(
                "ppdut5_mv is {voltage} mV, below the \
                 {MIN_PPDUT5_MV_WHEN_CONNECTED} mV connected threshold"
            )));
        }
        Ok(())
    }
    .boxed()
}

/// Verify servod supports the control named by `command`, optionally
/// comparing its value against one typed expectation argument.
pub fn check_servod_control(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let command = info.action_args().as_string(COMMAND_ARG, "");
        if command.is_empty() {
            return Err(ExecError::MissingArgument { arg: COMMAND_ARG });
        }
        let args = info.action_args().clone();
        let servod = info.new_servod().await?;
        let cancel = info.cancel();
        if let Some(expected) = args.get("expected_string_value") {
            let actual = get_string(servod.as_ref(), cancel, &command).await?;
            if actual != expected {
                return Err(ExecError::failed(format!(
                    "control {command:?} returned {actual:?}, expected \
                     {expected:?}"
                )));
            }
        } else if let Some(expected) = args.get("expected_int_value") {
            let want: i32 = expected.parse().map_err(|_| {
                ExecError::MalformedArgument {
                    arg: "expected_int_value",
                    value: expected.to_string(),
                }
            })?;
            let actual = get_int(servod.as_ref(), cancel, &command).await?;
            if actual != want {
                return Err(ExecError::failed(format!(
                    "control {command:?} returned {actual}, expected {want}"
                )));
            }
        } else if let Some(expected) = args.get("expected_float_value") {
            let want: f64 = expected.parse().map_err(|_| {
                ExecError::MalformedArgument {
                    arg: "expected_float_value",
                    value: expected.to_string(),
                }
            })?;
            let actual = get_double(servod.as_ref(), cancel, &command).await?;
            if actual != want {
                return Err(ExecError::failed(format!(
                    "control {command:?} returned {actual}, expected {want}"
                )));
            }
        } else if let Some(expected) = args.get("expected_bool_value") {
            let want: bool = expected.parse().map_err(|_| {
                ExecError::MalformedArgument {
                    arg: "expected_bool_value",
                    value: expected.to_string(),
                }
            })?;
            let actual = get_bool(servod.as_ref(), cancel, &command).await?;
            if actual != want {
                return Err(ExecError::failed(format!(
                    "control {command:?} returned {actual}, expected {want}"
                )));
            }
        } else {
            // No expectation given; reading the control is the whole check.
            let value = servod.get(cancel, &command).await?;
            info!(
                info.log(), "servod control read";
                "command" => &command,
                "value" => %value,
            );
        }
        Ok(())
    }
    .boxed()
}

/// Initialize the DUT side of the servo: `hwinit`, then power down the USB
/// key if the multiplexer control exists.
pub fn init_dut_for_servo(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let servod = info.new_servod().await?;
        let cancel = info.cancel();
        servod.call(cancel, "hwinit", vec![Value::Bool(true)]).await?;
        let usb_mux_control = "usb_mux_oe1";
        if servod.has(cancel, usb_mux_control).await.is_ok() {
            servod.set(cancel, usb_mux_control, Value::from("on")).await?;
            servod.set(cancel, "image_usbkey_pwr", Value::from("off")).await?;
        } else {
            debug!(
                info.log(), "servod control is not available";
                "control" => usb_mux_control,
            );
        }
        Ok(())
    }
    .boxed()
}

/// The uart command control for the root servo; v4p1 uses its own name.
async fn uart_command_control(
    servod: &dyn Servod,
    cancel: &CancellationToken,
) -> &'static str {
    if servod.has(cancel, UART_V4_CONTROL).await.is_ok() {
        UART_V4_CONTROL
    } else {
        UART_V4P1_CONTROL
    }
}

/// Briefly unplug the DUT from the servo and restore the connection.
pub fn fake_disconnect_dut(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let args = info.action_args();
        let delay_ms = args.as_int("delay_in_ms", 100).max(0) as u64;
        let timeout_ms = args.as_int("timeout_in_ms", 2000).max(0) as u64;
        let servod = info.new_servod().await?;
        let cancel = info.cancel();
        let uart = uart_command_control(servod.as_ref(), cancel).await;
        let disconnect = format!("fakedisconnect {delay_ms} {timeout_ms}");
        servod.set(cancel, uart, Value::from(disconnect)).await?;
        // Wait out the disconnect window plus settle time.
        let wait = Duration::from_millis(delay_ms + timeout_ms)
            + Duration::from_secs(2);
        retry::sleep(cancel, wait).await?;
        Ok(())
    }
    .boxed()
}

/// Toggle the servo's CC line off and back on.
pub fn servod_cc_toggle(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let args = info.action_args();
        let off_wait = args.as_duration("off_timeout", 10, Duration::from_secs(1));
        let on_wait = args.as_duration("on_timeout", 30, Duration::from_secs(1));
        let servod = info.new_servod().await?;
        let cancel = info.cancel();
        let uart = uart_command_control(servod.as_ref(), cancel).await;
        info!(info.log(), "turning configuration channel off"; "wait" => ?off_wait);
        servod.set(cancel, uart, Value::from("cc off")).await?;
        retry::sleep(cancel, off_wait).await?;
        info!(info.log(), "turning configuration channel on"; "wait" => ?on_wait);
        servod.set(cancel, "servo_pd_role", Value::from("src")).await?;
        servod.set(cancel, "servo_dts_mode", Value::from("on")).await?;
        retry::sleep(cancel, on_wait).await?;
        Ok(())
    }
    .boxed()
}
