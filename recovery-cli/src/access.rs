// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lab access backed by real SSH sessions and servod XML-RPC.

use async_trait::async_trait;
use camino::Utf8Path;
use recovery_execs::Access;
use recovery_execs::AccessError;
use recovery_execs::ServodOptions;
use recovery_types::ServoHost;
use recovery_types::StableVersion;
use servo_comms::Runner;
use servo_comms::Servod;
use servo_comms::ServodClient;
use servo_comms::ServodError;
use servo_comms::SshPool;
use servo_comms::SshRunner;
use slog::info;
use slog::Logger;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(120);
const COPY_TIMEOUT: Duration = Duration::from_secs(300);

/// [`Access`] implementation for one DUT's recovery run. Servod lifecycle
/// requests are resolved against the servo-host record captured when the
/// snapshot was loaded.
pub struct LabAccess {
    pool: Arc<SshPool>,
    servo_host: ServoHost,
    stable_versions: HashMap<String, StableVersion>,
    cancel: CancellationToken,
    log: Logger,
}

impl LabAccess {
    pub fn new(
        pool: Arc<SshPool>,
        servo_host: ServoHost,
        stable_versions: HashMap<String, StableVersion>,
        cancel: CancellationToken,
        log: &Logger,
    ) -> Self {
        Self {
            pool,
            servo_host,
            stable_versions,
            cancel,
            log: log.clone(),
        }
    }

    fn ssh_port_for(&self, host: &str) -> u16 {
        if host == self.servo_host.name {
            self.servo_host.ssh_port
        } else {
            22
        }
    }

    fn servo_host_runner(&self) -> Arc<dyn Runner> {
        self.runner(&self.servo_host.name)
    }

    /// `start servod` parameters in the order the upstart job expects.
    fn servod_params(options: &ServodOptions) -> Vec<String> {
        let mut parts = Vec::new();
        if !options.dut_board.is_empty() {
            parts.push(format!("BOARD={}", options.dut_board));
            if !options.dut_model.is_empty() {
                parts.push(format!("MODEL={}", options.dut_model));
            }
        }
        parts.push(format!("PORT={}", options.servod_port));
        if !options.servo_serial.is_empty() {
            parts.push(format!("SERIAL={}", options.servo_serial));
        }
        if options.servo_dual {
            parts.push("DUAL_V4=1".to_string());
        }
        if options.use_cr50_config {
            parts.push("CONFIG=cr50.xml".to_string());
        }
        if options.recovery_mode {
            parts.push("REC_MODE=1".to_string());
        }
        parts
    }
}

#[async_trait]
impl Access for LabAccess {
    fn runner(&self, host: &str) -> Arc<dyn Runner> {
        Arc::new(SshRunner::new(
            Arc::clone(&self.pool),
            host,
            self.ssh_port_for(host),
            &self.log,
        ))
    }

    async fn servod(
        &self,
        host: &ServoHost,
        call_timeout: Duration,
    ) -> Result<Arc<dyn Servod>, ServodError> {
        let client = ServodClient::open(
            Arc::clone(&self.pool),
            host,
            call_timeout,
            &self.log,
        )
        .await?;
        Ok(Arc::new(client))
    }

    async fn init_servod(
        &self,
        resource: &str,
        options: &ServodOptions,
    ) -> Result<(), AccessError> {
        if self.servo_host.is_containerized() {
            return Err(AccessError::new(
                "servod lifecycle on containerized servo-hosts is not \
                 supported here",
            ));
        }
        let command =
            format!("start servod {}", Self::servod_params(options).join(" "));
        info!(
            self.log, "starting servod";
            "resource" => resource,
            "command" => &command,
        );
        self.servo_host_runner()
            .run(&self.cancel, LIFECYCLE_TIMEOUT, &command)
            .await
            .map_err(|err| {
                AccessError::new(format!("failed to start servod: {err}"))
            })?;
        Ok(())
    }

    async fn stop_servod(&self, resource: &str) -> Result<(), AccessError> {
        if self.servo_host.is_containerized() {
            return Err(AccessError::new(
                "servod lifecycle on containerized servo-hosts is not \
                 supported here",
            ));
        }
        let command =
            format!("stop servod PORT={}", self.servo_host.servod_port);
        info!(self.log, "stopping servod"; "resource" => resource);
        self.servo_host_runner()
            .run(&self.cancel, LIFECYCLE_TIMEOUT, &command)
            .await
            .map_err(|err| {
                AccessError::new(format!("failed to stop servod: {err}"))
            })?;
        Ok(())
    }

    async fn copy_from(
        &self,
        host: &str,
        remote: &Utf8Path,
        local_dir: &Utf8Path,
    ) -> Result<(), AccessError> {
        let name = remote.file_name().ok_or_else(|| {
            AccessError::new(format!("remote path {remote} has no file name"))
        })?;
        let content = self
            .runner(host)
            .run(&self.cancel, COPY_TIMEOUT, &format!("cat {remote}"))
            .await
            .map_err(|err| {
                AccessError::new(format!("failed to read {remote}: {err}"))
            })?;
        tokio::fs::create_dir_all(local_dir).await.map_err(|err| {
            AccessError::new(format!("failed to create {local_dir}: {err}"))
        })?;
        let local = local_dir.join(name);
        tokio::fs::write(&local, content).await.map_err(|err| {
            AccessError::new(format!("failed to write {local}: {err}"))
        })?;
        Ok(())
    }

    async fn stable_version(
        &self,
        resource: &str,
    ) -> Result<StableVersion, AccessError> {
        self.stable_versions.get(resource).cloned().ok_or_else(|| {
            AccessError::new(format!(
                "no stable version record for {resource:?}"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn servod_params_are_ordered() {
        let options = ServodOptions {
            recovery_mode: true,
            dut_board: "eve".to_string(),
            dut_model: "eve".to_string(),
            servod_port: 9901,
            servo_serial: "S1".to_string(),
            servo_dual: true,
            use_cr50_config: true,
        };
        assert_eq!(
            LabAccess::servod_params(&options),
            [
                "BOARD=eve",
                "MODEL=eve",
                "PORT=9901",
                "SERIAL=S1",
                "DUAL_V4=1",
                "CONFIG=cr50.xml",
                "REC_MODE=1",
            ]
        );
    }

    #[test]
    fn model_requires_board() {
        let options = ServodOptions {
            recovery_mode: false,
            dut_board: String::new(),
            dut_model: "eve".to_string(),
            servod_port: 9901,
            servo_serial: String::new(),
            servo_dual: false,
            use_cr50_config: false,
        };
        assert_eq!(LabAccess::servod_params(&options), ["PORT=9901"]);
    }
}
