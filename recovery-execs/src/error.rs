// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use recovery_types::UnknownServoState;
use servo_comms::Cancelled;
use servo_comms::RunError;
use servo_comms::ServodError;
use servo_comms::TopologyError;
use slog_error_chain::SlogInlineError;
use thiserror::Error;

/// Failure reported by a lab-access backend (servod lifecycle, file copy,
/// versioner). The backend lives behind the [`Access`] trait, so the error
/// carries only a message.
///
/// [`Access`]: crate::Access
#[derive(Debug, Error, SlogInlineError)]
#[error("{0}")]
pub struct AccessError(pub String);

impl AccessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure of a single exec step.
#[derive(Debug, Error, SlogInlineError)]
pub enum ExecError {
    #[error("no exec named {0:?}")]
    UnknownExec(String),
    #[error("missing required argument {arg:?}")]
    MissingArgument { arg: &'static str },
    #[error("malformed argument {arg:?}: {value:?}")]
    MalformedArgument { arg: &'static str, value: String },
    /// A snapshot precondition does not hold, e.g. the DUT carries no servo.
    #[error("{0}")]
    Precondition(String),
    /// The checked condition does not hold on the device.
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    State(#[from] UnknownServoState),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Servod(#[from] ServodError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl ExecError {
    pub fn precondition(message: impl Into<String>) -> Self {
        ExecError::Precondition(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ExecError::Failed(message.into())
    }
}

/// An exec failure annotated with the exec's canonical name, as surfaced to
/// the engine.
#[derive(Debug, Error, SlogInlineError)]
#[error("{exec} failed")]
pub struct ExecFailure {
    pub exec: String,
    #[source]
    pub err: ExecError,
}
