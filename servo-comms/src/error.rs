// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use slog_error_chain::SlogInlineError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// The parent context was cancelled while an operation was in flight.
///
/// Kept distinct from domain failures so the engine can tell an aborted run
/// from a diagnosed problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Failure of a remote command run over SSH.
#[derive(Debug, Error, SlogInlineError)]
pub enum RunError {
    #[error("failed to dial ssh to {host}")]
    Dial {
        host: String,
        #[source]
        err: russh::Error,
    },
    #[error("failed to load ssh key from {path}")]
    LoadKey {
        path: String,
        #[source]
        err: russh_keys::Error,
    },
    #[error("ssh authentication rejected for {user}@{host}")]
    AuthRejected { user: String, host: String },
    #[error("failed to open session channel on {host}")]
    Channel {
        host: String,
        #[source]
        err: russh::Error,
    },
    #[error("failed to send command to {host}")]
    Send {
        host: String,
        #[source]
        err: russh::Error,
    },
    #[error("command {command:?} on {host} exited with status {status}: {stderr}")]
    ExitStatus { host: String, command: String, status: u32, stderr: String },
    #[error("command {command:?} on {host} closed without an exit status")]
    NoExitStatus { host: String, command: String },
    #[error("command {command:?} on {host} timed out after {timeout:?}")]
    Timeout { host: String, command: String, timeout: Duration },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl RunError {
    /// Remote exit status, when the command ran to completion and failed.
    pub fn exit_status(&self) -> Option<u32> {
        match self {
            RunError::ExitStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the session this command ran on can no longer be trusted:
    /// the channel failed outright, or the call was abandoned mid-exec and
    /// the channel is left half-open with the remote command still running.
    pub(crate) fn retires_session(&self) -> bool {
        matches!(
            self,
            RunError::Channel { .. }
                | RunError::Send { .. }
                | RunError::Timeout { .. }
                | RunError::Cancelled(_)
        )
    }
}

/// Failure to set up or operate a forward tunnel to a servod port.
#[derive(Debug, Error, SlogInlineError)]
pub enum TunnelError {
    #[error("transport unavailable: cannot reach port {port} on {host}")]
    TransportUnavailable {
        host: String,
        port: u16,
        #[source]
        err: russh::Error,
    },
    #[error("failed to bind local tunnel listener")]
    Bind(#[source] io::Error),
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Failure of a servod RPC or of the typed facade over it.
#[derive(Debug, Error, SlogInlineError)]
pub enum ServodError {
    #[error("servod command cannot be empty")]
    EmptyCommand,
    #[error("servod port {0} is not valid (expected > 9000)")]
    BadPort(u16),
    #[error("servo-host record carries no servo")]
    NoServo,
    #[error("http request to servod failed")]
    Http(#[from] reqwest::Error),
    #[error("failed to encode servod request")]
    Encode(#[from] servod_protocol::EncodeError),
    #[error("failed to decode servod response")]
    Decode(#[source] servod_protocol::DecodeError),
    #[error(transparent)]
    Fault(#[from] servod_protocol::Fault),
    #[error("control {command:?} returned {got}, expected {expected}")]
    WrongType { command: String, expected: &'static str, got: &'static str },
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl From<servod_protocol::DecodeError> for ServodError {
    fn from(err: servod_protocol::DecodeError) -> Self {
        match err {
            servod_protocol::DecodeError::Fault(fault) => {
                ServodError::Fault(fault)
            }
            other => ServodError::Decode(other),
        }
    }
}

/// Failure to discover the servo topology on a servo-host.
#[derive(Debug, Error, SlogInlineError)]
pub enum TopologyError {
    #[error("servo {serial} not detected on host")]
    ServoNotDetected { serial: String },
    #[error("no known servo device type for VID:PID {vid_pid:?}")]
    UnknownVidPid { vid_pid: String },
    #[error("VID:PID pair is empty")]
    EmptyVidPid,
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Failure of a servo firmware update attempt.
#[derive(Debug, Error, SlogInlineError)]
pub enum UpdateError {
    #[error("issue with servo_updater detected: {message}")]
    UpdaterIssue { message: String },
    #[error("device {device_type} still requires an update")]
    StillOutdated { device_type: String },
    #[error("failed to re-read firmware version for {device_type}")]
    RereadVersion {
        device_type: String,
        #[source]
        err: TopologyError,
    },
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}
