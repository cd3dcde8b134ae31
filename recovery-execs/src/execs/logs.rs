// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Servod log collection and servo-host cleanup execs.

use crate::error::ExecError;
use crate::info::ExecInfo;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use chrono::NaiveDateTime;
use futures::future::BoxFuture;
use futures::FutureExt;
use slog::debug;
use slog::info;
use std::time::Duration;

const LOGS_TIMEOUT: Duration = Duration::from_secs(60);

// Rotated servod log names look like `log.2023-09-07--09-07-09.661.INFO`.
const LOG_STAMP_FORMAT: &str = "%Y-%m-%d--%H-%M-%S%.3f";
const LOG_LEVELS: [&str; 3] = ["INFO", "DEBUG", "WARNING"];

/// Default destination for collected logs when the plan does not say.
const DEFAULT_LOGS_DIR: &str = "/tmp/recovery_logs";

/// Disposable files that accumulate on labstations and eventually fill the
/// disk.
const DISK_CLEANUP_PATHS: [&str; 5] = [
    "/var/lib/metrics/uma-events",
    "/var/spool/crash/*",
    "/var/log/chrome/*",
    "/var/log/ui/*",
    "/home/chronos/BrowserMetrics/*",
];

/// Parse the timestamp out of a rotated servod log name, or None when the
/// name is not a rotated log at all.
fn log_file_stamp(name: &str) -> Option<NaiveDateTime> {
    let rest = name.strip_prefix("log.")?;
    let (stamp, level) = rest.rsplit_once('.')?;
    if !LOG_LEVELS.contains(&level) {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, LOG_STAMP_FORMAT).ok()
}

/// Copy every servod log rotated since this run started into a per-host
/// directory under `logs_dir`.
pub fn collect_servod_logs(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let logs_dir = Utf8PathBuf::from(
            info.action_args().as_string("logs_dir", DEFAULT_LOGS_DIR),
        );
        let host = info.servo_host()?.name.clone();
        let port = info.servo_host()?.servod_port;
        let runner = info.servo_host_runner()?;
        let active = runner
            .run(
                info.cancel(),
                LOGS_TIMEOUT,
                &format!("realpath /var/log/servod_{port}/latest.DEBUG"),
            )
            .await?;
        let active = Utf8Path::new(active.trim());
        let remote_dir = active.parent().ok_or_else(|| {
            ExecError::failed(format!(
                "active servod log {active} has no parent directory"
            ))
        })?;
        let listing = runner
            .run(info.cancel(), LOGS_TIMEOUT, &format!("ls {remote_dir}"))
            .await?;
        let since = info.started_at().naive_utc();
        let local_dir = logs_dir.join(&host);
        let mut collected = 0usize;
        for name in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Some(stamp) = log_file_stamp(name) else {
                continue;
            };
            if stamp < since {
                debug!(info.log(), "skipping stale servod log"; "file" => name);
                continue;
            }
            info.copy_from(&host, &remote_dir.join(name), &local_dir).await?;
            collected += 1;
        }
        info!(
            info.log(), "collected servod logs";
            "count" => collected,
            "dir" => %local_dir,
        );
        Ok(())
    }
    .boxed()
}

/// Free disk space on the labstation by deleting accumulated metrics,
/// crash dumps, and browser logs. Paths that are already gone are fine.
pub fn labstation_disk_cleanup(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let runner = info.servo_host_runner()?;
        for path in DISK_CLEANUP_PATHS {
            if let Err(err) = runner
                .run(info.cancel(), LOGS_TIMEOUT, &format!("rm {path}"))
                .await
            {
                debug!(info.log(), "disk cleanup"; "err" => %err);
            }
            info!(info.log(), "labstation path removed"; "path" => path);
        }
        Ok(())
    }
    .boxed()
}

/// Delete rotated servod logs older than `max_days` on the servo-host.
pub fn servod_old_logs_cleanup(
    info: &mut ExecInfo,
) -> BoxFuture<'_, Result<(), ExecError>> {
    async move {
        let raw = info
            .action_args()
            .get("max_days")
            .ok_or(ExecError::MissingArgument { arg: "max_days" })?
            .trim()
            .to_string();
        let max_days: i64 = raw.parse().map_err(|_| {
            ExecError::MalformedArgument { arg: "max_days", value: raw.clone() }
        })?;
        info!(info.log(), "removing old servod logs"; "max_days" => max_days);
        let runner = info.servo_host_runner()?;
        let command = format!(
            "/usr/bin/find /var/log/servod_* -mtime +{max_days} -print -delete"
        );
        // Nothing to delete also exits non-zero; not worth failing over.
        if let Err(err) =
            runner.run(info.cancel(), LOGS_TIMEOUT, &command).await
        {
            debug!(info.log(), "servod log cleanup"; "err" => %err);
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
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;

    #[test]
    fn stamp_parsing_rejects_foreign_names() {
        assert!(log_file_stamp("log.2023-09-07--09-07-09.661.INFO").is_some());
        assert!(log_file_stamp("log.2023-09-07--09-07-09.661.DEBUG").is_some());
        assert!(log_file_stamp("latest.DEBUG").is_none());
        assert!(log_file_stamp("log.2023-09-07--09-07-09.661.TRACE").is_none());
        assert!(log_file_stamp("log.not-a-stamp.INFO").is_none());
    }

    #[tokio::test]
    async fn collects_only_logs_newer_than_the_run() {
        let access = Arc::new(FakeAccess::default());
        let mut info = exec_info_with(dual_dut(), access.clone(), &[]);
        let fresh = (info.started_at() + ChronoDuration::hours(1))
            .format(LOG_STAMP_FORMAT);
        let stale = (info.started_at() - ChronoDuration::hours(1))
            .format(LOG_STAMP_FORMAT);
        access.runner.respond(
            "realpath /var/log/servod_9901/latest.DEBUG",
            &format!("/var/log/servod_9901/log.{fresh}.DEBUG\n"),
        );
        access.runner.respond(
            "ls /var/log/servod_9901",
            &format!(
                "latest.DEBUG\nlog.{fresh}.DEBUG\nlog.{fresh}.INFO\n\
                 log.{stale}.INFO\n"
            ),
        );
        collect_servod_logs(&mut info).await.unwrap();
        let events = access.events();
        assert_eq!(events.len(), 2);
        for event in &events {
            assert!(
                event.starts_with("copy_from labstation-1 /var/log/servod_9901/log.")
                    && event.ends_with("-> /tmp/recovery_logs/labstation-1"),
                "{event}"
            );
        }
        assert!(!events.iter().any(|e| e.contains(&stale.to_string())));
    }

    #[tokio::test]
    async fn cleanup_requires_a_valid_max_days() {
        let access = Arc::new(FakeAccess::default());
        let mut info = exec_info_with(dual_dut(), access.clone(), &[]);
        assert!(matches!(
            servod_old_logs_cleanup(&mut info).await.unwrap_err(),
            ExecError::MissingArgument { arg: "max_days" }
        ));

        let mut info =
            exec_info_with(dual_dut(), access.clone(), &["max_days:soon"]);
        assert!(matches!(
            servod_old_logs_cleanup(&mut info).await.unwrap_err(),
            ExecError::MalformedArgument { arg: "max_days", .. }
        ));
    }

    #[tokio::test]
    async fn disk_cleanup_sweeps_every_path() {
        let access = Arc::new(FakeAccess::default());
        // Every rm is unscripted and fails; the sweep still finishes.
        let mut info = exec_info_with(dual_dut(), access.clone(), &[]);
        labstation_disk_cleanup(&mut info).await.unwrap();
        let expected: Vec<String> = DISK_CLEANUP_PATHS
            .iter()
            .map(|p| format!("rm {p}"))
            .collect();
        assert_eq!(access.runner.commands(), expected);
    }

    #[tokio::test]
    async fn cleanup_tolerates_find_failures() {
        let access = Arc::new(FakeAccess::default());
        // The find command is unscripted and fails; cleanup still succeeds.
        let mut info =
            exec_info_with(dual_dut(), access.clone(), &["max_days:5"]);
        servod_old_logs_cleanup(&mut info).await.unwrap();
        assert_eq!(
            access.runner.commands(),
            ["/usr/bin/find /var/log/servod_* -mtime +5 -print -delete"]
        );
    }
}
