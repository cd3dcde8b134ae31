// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operator CLI: run recovery execs against a DUT snapshot.

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;
use clap::Subcommand;
use recovery_execs::standard_registry;
use recovery_execs::ExecInfo;
use recovery_types::Dut;
use recovery_types::StableVersion;
use servo_comms::SshConfig;
use servo_comms::SshPool;
use slog::info;
use slog::o;
use slog::Drain;
use slog::Level;
use slog::Logger;
use slog_async::AsyncGuard;
use std::collections::HashMap;
use std::fs;
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod access;

use access::LabAccess;

/// Command line program that runs servo recovery execs against one DUT.
#[derive(Parser, Debug)]
struct Args {
    #[clap(
        short,
        long,
        default_value = "info",
        value_parser = level_from_str,
        help = "Log level: {off,critical,error,warn,info,debug,trace}",
    )]
    log_level: Level,

    /// Write logs to a file instead of stderr.
    #[clap(long)]
    logfile: Option<Utf8PathBuf>,

    /// SSH user for servo-hosts and DUTs.
    #[clap(long, default_value = "root")]
    ssh_user: String,

    /// SSH private key; omitted means `none` authentication.
    #[clap(long)]
    ssh_key: Option<Utf8PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

fn level_from_str(s: &str) -> Result<Level> {
    if let Ok(level) = s.parse() {
        Ok(level)
    } else {
        bail!(format!("Invalid log level: {}", s))
    }
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// List every registered exec by name.
    ListExecs,

    /// Run one exec against a DUT snapshot and write the snapshot back.
    Run {
        /// Path to the DUT snapshot (JSON).
        #[clap(long)]
        snapshot: Utf8PathBuf,

        /// Name of the exec to run.
        #[clap(long)]
        exec: String,

        /// Action argument, `key:value`. May be given multiple times.
        #[clap(long = "arg")]
        args: Vec<String>,

        /// Overall action timeout.
        #[clap(long, default_value = "5m", value_parser = humantime::parse_duration)]
        timeout: Duration,

        /// JSON map of DUT name to stable-version record.
        #[clap(long)]
        stable_versions: Option<Utf8PathBuf>,
    },
}

fn build_logger(
    level: Level,
    path: Option<&Utf8PathBuf>,
) -> Result<(Logger, AsyncGuard)> {
    fn make_drain<D: slog_term::Decorator + Send + 'static>(
        level: Level,
        decorator: D,
    ) -> (slog::Fuse<slog_async::Async>, AsyncGuard) {
        let drain = slog_term::FullFormat::new(decorator)
            .build()
            .filter_level(level)
            .fuse();
        let (drain, guard) = slog_async::Async::new(drain).build_with_guard();
        (drain.fuse(), guard)
    }

    let (drain, guard) = if let Some(path) = path {
        let file = File::create(path)
            .with_context(|| format!("failed to create logfile {path}"))?;
        make_drain(level, slog_term::PlainDecorator::new(file))
    } else {
        make_drain(level, slog_term::TermDecorator::new().build())
    };

    Ok((Logger::root(drain, o!("component" => "recovery-cli")), guard))
}

fn load_stable_versions(
    path: Option<&Utf8PathBuf>,
) -> Result<HashMap<String, StableVersion>> {
    let Some(path) = path else {
        return Ok(HashMap::new());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {path}"))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse stable versions in {path}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (log, log_guard) =
        build_logger(args.log_level, args.logfile.as_ref())?;

    let registry = standard_registry();

    match args.command {
        Command::ListExecs => {
            for name in registry.names() {
                println!("{name}");
            }
        }
        Command::Run { snapshot, exec, args: exec_args, timeout, stable_versions } => {
            if !registry.contains(&exec) {
                bail!("unknown exec {exec:?}; see `list-execs`");
            }
            let raw = fs::read_to_string(&snapshot)
                .with_context(|| format!("failed to read {snapshot}"))?;
            let dut: Dut = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse snapshot {snapshot}"))?;
            let servo_host = dut
                .servo_host
                .clone()
                .with_context(|| format!("snapshot {snapshot} has no servo-host"))?;
            let stable_versions =
                load_stable_versions(stable_versions.as_ref())?;

            let cancel = CancellationToken::new();
            let ctrl_c_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c_cancel.cancel();
                }
            });

            let ssh_config = SshConfig {
                user: args.ssh_user,
                key_path: args.ssh_key,
                ..Default::default()
            };
            let pool = Arc::new(SshPool::new(ssh_config, &log));
            let access = Arc::new(LabAccess::new(
                pool,
                servo_host,
                stable_versions,
                cancel.clone(),
                &log,
            ));

            let mut info = ExecInfo::new(
                dut,
                access,
                timeout,
                &exec_args,
                cancel,
                log.new(o!("exec" => exec.clone())),
            );
            let result = registry.run(&exec, &mut info).await;

            // The snapshot carries state verdicts even when the exec fails.
            let updated = serde_json::to_string_pretty(&info.dut)
                .context("failed to serialize snapshot")?;
            fs::write(&snapshot, updated)
                .with_context(|| format!("failed to write {snapshot}"))?;

            result.with_context(|| format!("exec {exec:?} failed"))?;
            info!(log, "exec completed"; "exec" => &exec);
        }
    }

    drop(log_guard);
    Ok(())
}
