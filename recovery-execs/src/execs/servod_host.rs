// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Servod lifecycle and servo-host recovery execs.

use crate::error::ExecError;
use crate::info::ExecInfo;
use futures::future::BoxFuture;
use futures::FutureExt;
use servo_comms::retry;
use slog::debug;
use slog::warn;
use std::sync::Arc;
use std::time::Duration;

const ECHO_TIMEOUT: Duration = Duration::from_secs(60);

const BOOT_ID_COMMAND: &str = "cat /proc/sys/kernel/random/boot_id";

// Escalating reboot sequence for v3 hosts; each step only matters if the
// previous one failed to take the host down.
const V3_REBOOT_SEQUENCE: &str = "sync & sleep 5; reboot & sleep 60; \
     reboot -f & sleep 10; reboot -nf & sleep 10; telinit 6";

async fn init(info: &mut ExecInfo) -> Result<(), ExecError> {
    if info.dut.name.is_empty() {
        return Err(ExecError::precondition("dut name is empty"));
    }
    let options = info.servod_options()?;
    debug!(info.log(), "starting servod"; "options" => ?options);
    info.access().init_servod(&info.dut.name, &options).await?;
    Ok(())
}

/// Start servod with recovery-mode options derived from the snapshot.
pub fn servod_init(info: &mut ExecInfo) -> BoxFuture<'_, Result<(), ExecError>> {
    async move { init(info).await }.boxed()
}

/// Stop servod for this DUT.
pub fn servod_stop(info: &mut ExecInfo) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        info.access().stop_servod(&info.dut.name).await?;
        Ok(())
    }
    .boxed()
}

/// Stop-then-start servod. A stop failure usually means servod was not
/// running, so it is logged and not returned.
pub fn servod_restart(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        if let Err(err) = info.access().stop_servod(&info.dut.name).await {
            warn!(
                info.log(), "stopping servod before restart failed";
                "err" => %err,
            );
        }
        init(info).await
    }
    .boxed()
}

/// Verify servod answers `dut-control` on the servo-host.
pub fn servod_echo_host(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let port = info.servo_host()?.servod_port;
        let runner = info.servo_host_runner()?;
        let command = format!("dut-control -p {port} serialname");
        let serial =
            runner.run(info.cancel(), ECHO_TIMEOUT, &command).await.map_err(
                |err| {
                    ExecError::failed(format!(
                        "servod is not responsive for dut-control commands: {err}"
                    ))
                },
            )?;
        debug!(info.log(), "servod is responsive"; "serialname" => serial);
        Ok(())
    }
    .boxed()
}

/// Reboot a v3 servo-host and verify it actually restarted by comparing
/// kernel boot ids across the reboot.
pub fn host_v3_reboot(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let args = info.action_args();
        let reboot_timeout =
            args.as_duration("reboot_timeout", 10, Duration::from_secs(1));
        let restart_timeout =
            args.as_duration("restart_timeout", 300, Duration::from_secs(1));
        let poll_interval =
            args.as_duration("poll_interval", 10, Duration::from_secs(1));
        let runner = info.servo_host_runner()?;
        let cancel = info.cancel();
        // An unreadable old boot id only forfeits the comparison.
        let old_boot_id = match runner
            .run(cancel, reboot_timeout, BOOT_ID_COMMAND)
            .await
        {
            Ok(id) => id.trim().to_string(),
            Err(err) => {
                debug!(info.log(), "old boot id unreadable"; "err" => %err);
                String::new()
            }
        };
        // Detach the sequence so the channel returns before the host goes
        // down.
        let command = format!(
            "( {V3_REBOOT_SEQUENCE} ) </dev/null >/dev/null 2>&1 & echo -n $!"
        );
        runner.run(cancel, reboot_timeout, &command).await?;
        let new_boot_id = retry::with_timeout(
            cancel,
            poll_interval,
            restart_timeout,
            "wait for servo-host reboot",
            info.log(),
            || {
                let runner = Arc::clone(&runner);
                let cancel = cancel.clone();
                let old_boot_id = old_boot_id.clone();
                async move {
                    let id = runner
                        .run(&cancel, reboot_timeout, BOOT_ID_COMMAND)
                        .await
                        .map_err(|err| err.to_string())?;
                    let id = id.trim().to_string();
                    if !old_boot_id.is_empty() && id == old_boot_id {
                        return Err(format!("boot id is still {id}"));
                    }
                    Ok(id)
                }
            },
        )
        .await
        .map_err(|err| {
            ExecError::failed(format!(
                "servo-host did not come back from reboot: {err}"
            ))
        })?;
        debug!(info.log(), "servo-host rebooted"; "boot_id" => new_boot_id);
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
    use recovery_types::ATTR_POOLS;
    use recovery_types::ATTR_SERVO_SETUP;
    use recovery_types::SERVO_SETUP_DUAL;
    use std::sync::Arc;

    #[tokio::test]
    async fn init_builds_options_from_snapshot() {
        let mut dut = dual_dut();
        dut.extra_attributes.insert(
            ATTR_SERVO_SETUP.to_string(),
            vec![SERVO_SETUP_DUAL.to_string()],
        );
        dut.extra_attributes.insert(
            ATTR_POOLS.to_string(),
            vec!["faft-cr50-pool".to_string()],
        );
        let access = Arc::new(FakeAccess::default());
        let mut info = exec_info_with(dut, access.clone(), &[]);
        servod_init(&mut info).await.unwrap();
        assert_eq!(
            access.events(),
            ["init_servod dut-1 port=9901 serial=SERVOV4P1_EX dual=true \
              cr50=true"]
        );
    }

    #[tokio::test]
    async fn init_requires_servo() {
        let mut dut = dual_dut();
        dut.servo_host.as_mut().unwrap().servo = None;
        let mut info = exec_info_with(dut, Arc::new(FakeAccess::default()), &[]);
        let err = servod_init(&mut info).await.unwrap_err();
        assert!(matches!(err, ExecError::Precondition(_)));
    }

    #[tokio::test]
    async fn restart_survives_stop_failure() {
        let access = Arc::new(FakeAccess {
            fail_stop: true,
            ..Default::default()
        });
        let mut info = exec_info_with(dual_dut(), access.clone(), &[]);
        servod_restart(&mut info).await.unwrap();
        let events = access.events();
        assert_eq!(events.len(), 2);
        assert!(events[0].starts_with("stop_servod"));
        assert!(events[1].starts_with("init_servod"));
    }

    #[tokio::test]
    async fn echo_host_runs_dut_control() {
        let access = Arc::new(FakeAccess::default());
        access
            .runner
            .respond("dut-control -p 9901 serialname", "SERVOV4P1_EX");
        let mut info = exec_info_with(dual_dut(), access.clone(), &[]);
        servod_echo_host(&mut info).await.unwrap();
    }

    #[tokio::test]
    async fn echo_host_fails_when_servod_is_unresponsive() {
        let mut info =
            exec_info_with(dual_dut(), Arc::new(FakeAccess::default()), &[]);
        let err = servod_echo_host(&mut info).await.unwrap_err();
        assert!(matches!(err, ExecError::Failed(_)));
    }

    fn v3_reboot_command() -> String {
        format!("( {V3_REBOOT_SEQUENCE} ) </dev/null >/dev/null 2>&1 & echo -n $!")
    }

    #[tokio::test]
    async fn v3_reboot_waits_for_a_new_boot_id() {
        let access = Arc::new(FakeAccess::default());
        access.runner.respond_seq(
            BOOT_ID_COMMAND,
            &["old-boot-id", "old-boot-id", "new-boot-id"],
        );
        access.runner.respond(&v3_reboot_command(), "4242");
        let mut info = exec_info_with(
            dual_dut(),
            access.clone(),
            &["poll_interval:0", "restart_timeout:5"],
        );
        host_v3_reboot(&mut info).await.unwrap();
        // One pre-reboot read, the reboot itself, two polls.
        let commands = access.runner.commands();
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[1], v3_reboot_command());
    }

    #[tokio::test]
    async fn v3_reboot_fails_when_boot_id_never_changes() {
        let access = Arc::new(FakeAccess::default());
        access.runner.respond(BOOT_ID_COMMAND, "same-boot-id");
        access.runner.respond(&v3_reboot_command(), "4242");
        let mut info = exec_info_with(
            dual_dut(),
            access,
            &["poll_interval:0", "restart_timeout:0"],
        );
        let err = host_v3_reboot(&mut info).await.unwrap_err();
        assert!(matches!(err, ExecError::Failed(_)), "{err}");
    }

    #[tokio::test]
    async fn v3_reboot_surfaces_a_failed_reboot_command() {
        let access = Arc::new(FakeAccess::default());
        access.runner.respond(BOOT_ID_COMMAND, "old-boot-id");
        let mut info = exec_info_with(dual_dut(), access, &[]);
        let err = host_v3_reboot(&mut info).await.unwrap_err();
        assert!(matches!(err, ExecError::Run(_)), "{err}");
    }
}
