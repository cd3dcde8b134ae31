// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Servo state bookkeeping on the DUT snapshot.

use crate::error::ExecError;
use crate::info::ExecInfo;
use futures::future::BoxFuture;
use futures::FutureExt;
use recovery_types::ServoState;
use slog::info;

const STATE_ARG: &str = "state";

fn required_state_arg(info: &ExecInfo) -> Result<ServoState, ExecError> {
    let raw = info.action_args().as_string(STATE_ARG, "");
    if raw.is_empty() {
        return Err(ExecError::MissingArgument { arg: STATE_ARG });
    }
    Ok(ServoState::parse(&raw)?)
}

/// Set the servo state named by the `state` argument on the snapshot.
pub fn set_servo_state(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let state = required_state_arg(info)?;
        let servo = info.servo_mut()?;
        servo.state = state;
        info!(info.log(), "servo state set"; "state" => %state);
        Ok(())
    }
    .boxed()
}

/// Fail unless the snapshot's servo state matches the `state` argument,
/// compared case-insensitively.
pub fn match_state(info: &mut ExecInfo) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let raw = info.action_args().as_string(STATE_ARG, "");
        if raw.is_empty() {
            return Err(ExecError::MissingArgument { arg: STATE_ARG });
        }
        let current = info.servo()?.state;
        if !current.to_string().eq_ignore_ascii_case(&raw) {
            return Err(ExecError::failed(format!(
                "servo state {current} does not match expected {raw:?}"
            )));
        }
        Ok(())
    }
    .boxed()
}
