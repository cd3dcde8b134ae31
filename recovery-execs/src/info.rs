// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::args::ActionArgs;
use crate::error::AccessError;
use crate::error::ExecError;
use async_trait::async_trait;
use camino::Utf8Path;
use chrono::DateTime;
use chrono::Utc;
use recovery_types::Dut;
use recovery_types::Servo;
use recovery_types::ServoHost;
use recovery_types::StableVersion;
use recovery_types::ATTR_SERVO_SETUP;
use recovery_types::SERVO_SETUP_DUAL;
use servo_comms::Runner;
use servo_comms::Servod;
use servo_comms::ServodError;
use servo_comms::DEFAULT_CALL_TIMEOUT;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Options passed to the servod lifecycle backend when starting servod for a
/// DUT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServodOptions {
    pub recovery_mode: bool,
    pub dut_board: String,
    pub dut_model: String,
    pub servod_port: u16,
    pub servo_serial: String,
    /// Dual-child setup, from the `servo_setup` extra attribute.
    pub servo_dual: bool,
    /// Load the cr50 servod config, for DUTs in `faft-cr50` pools.
    pub use_cr50_config: bool,
}

/// Lab-access backend behind every exec: SSH runners per host, servod
/// facades per servo-host, the servod lifecycle, file retrieval, and the
/// stable-version service.
///
/// Production wires this to the SSH pool and the XML-RPC client; tests
/// substitute fakes without touching exec logic.
#[async_trait]
pub trait Access: Send + Sync {
    /// SSH runner for the named host.
    fn runner(&self, host: &str) -> Arc<dyn Runner>;

    /// Servod facade bound to the given servo-host, with the given per-call
    /// timeout.
    async fn servod(
        &self,
        host: &ServoHost,
        call_timeout: Duration,
    ) -> Result<Arc<dyn Servod>, ServodError>;

    /// Start servod on the servo-host serving `resource`.
    async fn init_servod(
        &self,
        resource: &str,
        options: &ServodOptions,
    ) -> Result<(), AccessError>;

    /// Stop servod on the servo-host serving `resource`.
    async fn stop_servod(&self, resource: &str) -> Result<(), AccessError>;

    /// Copy a file from a remote host into a local directory.
    async fn copy_from(
        &self,
        host: &str,
        remote: &Utf8Path,
        local_dir: &Utf8Path,
    ) -> Result<(), AccessError>;

    /// Stable-version record for a DUT by name.
    async fn stable_version(
        &self,
        resource: &str,
    ) -> Result<StableVersion, AccessError>;
}

/// Everything one exec invocation needs: exclusive ownership of the DUT
/// snapshot for the duration of the call, the parsed action arguments, and
/// transport factories.
pub struct ExecInfo {
    pub dut: Dut,
    access: Arc<dyn Access>,
    action_timeout: Duration,
    args: ActionArgs,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    log: Logger,
}

impl ExecInfo {
    pub fn new(
        dut: Dut,
        access: Arc<dyn Access>,
        action_timeout: Duration,
        raw_args: &[String],
        cancel: CancellationToken,
        log: Logger,
    ) -> Self {
        Self {
            dut,
            access,
            action_timeout,
            args: ActionArgs::parse(raw_args),
            started_at: Utc::now(),
            cancel,
            log,
        }
    }

    pub fn action_timeout(&self) -> Duration {
        self.action_timeout
    }

    pub fn action_args(&self) -> &ActionArgs {
        &self.args
    }

    /// When this recovery run started; used to skip stale remote logs.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub fn access(&self) -> &dyn Access {
        self.access.as_ref()
    }

    /// SSH runner for an arbitrary host.
    pub fn new_runner(&self, host: &str) -> Arc<dyn Runner> {
        self.access.runner(host)
    }

    /// The DUT's servo-host, required by most servo execs.
    pub fn servo_host(&self) -> Result<&ServoHost, ExecError> {
        self.dut.servo_host.as_ref().ok_or_else(|| {
            ExecError::precondition(format!(
                "dut {:?} has no servo-host",
                self.dut.name
            ))
        })
    }

    pub fn servo_host_mut(&mut self) -> Result<&mut ServoHost, ExecError> {
        let name = self.dut.name.clone();
        self.dut.servo_host.as_mut().ok_or_else(|| {
            ExecError::precondition(format!("dut {name:?} has no servo-host"))
        })
    }

    /// The servo record on the snapshot.
    pub fn servo(&self) -> Result<&Servo, ExecError> {
        self.servo_host()?.servo.as_ref().ok_or_else(|| {
            ExecError::precondition(format!(
                "dut {:?} has no servo on its servo-host",
                self.dut.name
            ))
        })
    }

    pub fn servo_mut(&mut self) -> Result<&mut Servo, ExecError> {
        let name = self.dut.name.clone();
        self.servo_host_mut()?.servo.as_mut().ok_or_else(|| {
            ExecError::precondition(format!(
                "dut {name:?} has no servo on its servo-host"
            ))
        })
    }

    /// SSH runner for the DUT's servo-host.
    pub fn servo_host_runner(&self) -> Result<Arc<dyn Runner>, ExecError> {
        Ok(self.access.runner(&self.servo_host()?.name))
    }

    /// Servod facade bound to the DUT's servo-host, with per-call timeout
    /// derived from the action timeout.
    pub async fn new_servod(&self) -> Result<Arc<dyn Servod>, ExecError> {
        let host = self.servo_host()?;
        if host.servo.is_none() {
            return Err(ExecError::precondition(format!(
                "dut {:?} has no servo on its servo-host",
                self.dut.name
            )));
        }
        let call_timeout = if self.action_timeout.is_zero() {
            DEFAULT_CALL_TIMEOUT
        } else {
            self.action_timeout
        };
        Ok(self.access.servod(host, call_timeout).await?)
    }

    /// Servod lifecycle options derived from the snapshot for recovery runs.
    pub fn servod_options(&self) -> Result<ServodOptions, ExecError> {
        let host = self.servo_host()?;
        let servo = self.servo()?;
        Ok(ServodOptions {
            recovery_mode: true,
            dut_board: self.dut.board.clone(),
            dut_model: self.dut.model.clone(),
            servod_port: host.servod_port,
            servo_serial: servo.serial_number.clone(),
            servo_dual: self
                .dut
                .has_extra_attribute(ATTR_SERVO_SETUP, SERVO_SETUP_DUAL),
            use_cr50_config: self.dut.any_pool_contains("faft-cr50"),
        })
    }

    pub async fn copy_from(
        &self,
        host: &str,
        remote: &Utf8Path,
        local_dir: &Utf8Path,
    ) -> Result<(), ExecError> {
        Ok(self.access.copy_from(host, remote, local_dir).await?)
    }

    pub async fn stable_version(&self) -> Result<StableVersion, ExecError> {
        Ok(self.access.stable_version(&self.dut.name).await?)
    }
}
