// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared fakes for exec tests: a scripted servo-host shell, a scripted
//! servod, and an [`Access`] implementation wiring both into an `ExecInfo`.

use crate::error::AccessError;
use crate::info::Access;
use crate::info::ExecInfo;
use crate::info::ServodOptions;
use async_trait::async_trait;
use camino::Utf8Path;
use recovery_types::Dut;
use recovery_types::FirmwareChannel;
use recovery_types::Servo;
use recovery_types::ServoHost;
use recovery_types::ServoState;
use recovery_types::ServoType;
use recovery_types::StableVersion;
use servo_comms::RunError;
use servo_comms::Runner;
use servo_comms::Servod;
use servo_comms::ServodError;
use servod_protocol::Fault;
use servod_protocol::Value;
use slog::o;
use slog::Logger;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Scripted remote shell: exact command string to canned stdout (queued per
/// command, the last value sticks), everything else exits non-zero. Records
/// every command issued.
#[derive(Default)]
pub(crate) struct FakeRunner {
    responses: Mutex<HashMap<String, VecDeque<String>>>,
    pub commands: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn respond(&self, command: &str, stdout: &str) {
        self.respond_seq(command, &[stdout]);
    }

    /// Queue successive outputs for one command.
    pub fn respond_seq(&self, command: &str, stdouts: &[&str]) {
        self.responses.lock().unwrap().insert(
            command.to_string(),
            stdouts.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl Runner for FakeRunner {
    async fn run(
        &self,
        _cancel: &CancellationToken,
        _timeout: Duration,
        command: &str,
    ) -> Result<String, RunError> {
        self.commands.lock().unwrap().push(command.to_string());
        let mut responses = self.responses.lock().unwrap();
        let stdout = responses.get_mut(command).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });
        stdout.ok_or_else(|| RunError::ExitStatus {
            host: "fake".to_string(),
            command: command.to_string(),
            status: 1,
            stderr: "scripted failure".to_string(),
        })
    }
}

/// Scripted servod. `get` pops queued values per control (the last value
/// sticks); `doc` succeeds for known controls, or for every control when
/// none were declared. Records calls as rendered strings.
#[derive(Default)]
pub(crate) struct FakeServod {
    gets: Mutex<HashMap<String, VecDeque<Value>>>,
    known: Mutex<Option<HashSet<String>>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeServod {
    pub fn get_returns(&self, control: &str, values: Vec<Value>) {
        self.gets
            .lock()
            .unwrap()
            .insert(control.to_string(), values.into());
    }

    /// Restrict `doc` to the given controls.
    pub fn known_controls(&self, controls: &[&str]) {
        *self.known.lock().unwrap() =
            Some(controls.iter().map(|c| c.to_string()).collect());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn fault(message: String) -> ServodError {
        ServodError::Fault(Fault { code: 1, message })
    }
}

#[async_trait]
impl Servod for FakeServod {
    async fn call(
        &self,
        _cancel: &CancellationToken,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ServodError> {
        let control =
            args.first().and_then(Value::as_str).unwrap_or_default().to_string();
        let rendered = match method {
            "set" => format!(
                "set {control} {}",
                args.get(1).map(|v| v.to_string()).unwrap_or_default()
            ),
            _ => format!("{method} {control}"),
        };
        self.calls.lock().unwrap().push(rendered);
        match method {
            "get" => {
                let mut gets = self.gets.lock().unwrap();
                let queue = gets.get_mut(&control).ok_or_else(|| {
                    Self::fault(format!("no control {control:?}"))
                })?;
                if queue.len() > 1 {
                    Ok(queue.pop_front().unwrap())
                } else {
                    queue.front().cloned().ok_or_else(|| {
                        Self::fault(format!("control {control:?} exhausted"))
                    })
                }
            }
            "doc" => {
                let known = self.known.lock().unwrap();
                match known.as_ref() {
                    Some(set) if !set.contains(&control) => {
                        Err(Self::fault(format!("no control {control:?}")))
                    }
                    _ => Ok(Value::from("doc")),
                }
            }
            _ => Ok(Value::Bool(true)),
        }
    }
}

/// Fake lab access: one runner and one servod for every host, plus a record
/// of lifecycle and copy requests.
pub(crate) struct FakeAccess {
    pub runner: Arc<FakeRunner>,
    pub servod: Arc<FakeServod>,
    pub events: Mutex<Vec<String>>,
    pub fail_stop: bool,
    pub version: StableVersion,
}

impl Default for FakeAccess {
    fn default() -> Self {
        Self {
            runner: Arc::new(FakeRunner::default()),
            servod: Arc::new(FakeServod::default()),
            events: Mutex::new(Vec::new()),
            fail_stop: false,
            version: StableVersion::default(),
        }
    }
}

impl FakeAccess {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Access for FakeAccess {
    fn runner(&self, _host: &str) -> Arc<dyn Runner> {
        self.runner.clone()
    }

    async fn servod(
        &self,
        _host: &ServoHost,
        _call_timeout: Duration,
    ) -> Result<Arc<dyn Servod>, ServodError> {
        Ok(self.servod.clone())
    }

    async fn init_servod(
        &self,
        resource: &str,
        options: &ServodOptions,
    ) -> Result<(), AccessError> {
        self.events.lock().unwrap().push(format!(
            "init_servod {resource} port={} serial={} dual={} cr50={}",
            options.servod_port,
            options.servo_serial,
            options.servo_dual,
            options.use_cr50_config,
        ));
        Ok(())
    }

    async fn stop_servod(&self, resource: &str) -> Result<(), AccessError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("stop_servod {resource}"));
        if self.fail_stop {
            return Err(AccessError::new("servod is not running"));
        }
        Ok(())
    }

    async fn copy_from(
        &self,
        host: &str,
        remote: &Utf8Path,
        local_dir: &Utf8Path,
    ) -> Result<(), AccessError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("copy_from {host} {remote} -> {local_dir}"));
        Ok(())
    }

    async fn stable_version(
        &self,
        _resource: &str,
    ) -> Result<StableVersion, AccessError> {
        Ok(self.version.clone())
    }
}

/// A DUT with a dual-setup servo on a plain (non-container) servo-host.
pub(crate) fn dual_dut() -> Dut {
    Dut {
        name: "dut-1".to_string(),
        board: "eve".to_string(),
        model: "eve".to_string(),
        servo_host: Some(ServoHost {
            name: "labstation-1".to_string(),
            ssh_port: 22,
            servod_port: 9901,
            servo: Some(Servo {
                serial_number: "SERVOV4P1_EX".to_string(),
                servo_type: ServoType::new("servo_v4p1_with_servo_micro"),
                firmware_channel: FirmwareChannel::Stable,
                state: ServoState::Unspecified,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn exec_info(dut: Dut) -> ExecInfo {
    exec_info_with(dut, Arc::new(FakeAccess::default()), &[])
}

pub(crate) fn exec_info_with(
    dut: Dut,
    access: Arc<FakeAccess>,
    raw_args: &[&str],
) -> ExecInfo {
    let raw: Vec<String> = raw_args.iter().map(|s| s.to_string()).collect();
    ExecInfo::new(
        dut,
        access,
        Duration::from_secs(60),
        &raw,
        CancellationToken::new(),
        Logger::root(slog::Discard, o!()),
    )
}
