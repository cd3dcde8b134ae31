// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SSH command transport to servo-hosts.
//!
//! [`SshPool`] multiplexes sessions to each remote host through a bounded
//! cache keyed by `host:port`; [`SshRunner`] binds the pool to one host and
//! implements the [`Runner`] capability the rest of the workspace is written
//! against. Per-call timeouts are enforced by dropping the in-flight session
//! future on expiry; an expired or cancelled call also retires the pooled
//! session, since the abandoned exec leaves a half-open channel behind and
//! the remote command may still be running.

use crate::error::Cancelled;
use crate::error::RunError;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use russh::client;
use russh::ChannelMsg;
use slog::debug;
use slog::o;
use slog::Logger;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Upper bound on cached sessions; lab fleets shard DUTs across many
/// servo-hosts, but one recovery process only ever touches a handful.
const MAX_SESSIONS: usize = 32;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Capability to run a command on a remote host and collect its stdout.
///
/// Execs and the topology/updater layers depend on this trait rather than on
/// the SSH machinery, so tests inject fakes here instead of mocking SSH.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        command: &str,
    ) -> Result<String, RunError>;
}

/// SSH client configuration shared by all sessions in a pool.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub user: String,
    /// Private key to authenticate with; `None` falls back to `none` auth.
    pub key_path: Option<Utf8PathBuf>,
    pub connect_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            key_path: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Lab hosts are reimaged frequently; host keys are not tracked.
        Ok(true)
    }
}

/// One established SSH session. Cheap to share; russh handles are internally
/// a channel sender.
pub(crate) struct SshSession {
    handle: client::Handle<ClientHandler>,
    host: String,
}

impl SshSession {
    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub(crate) async fn exec(
        &self,
        command: &str,
    ) -> Result<String, RunError> {
        let mut channel =
            self.handle.channel_open_session().await.map_err(|err| {
                RunError::Channel { host: self.host.clone(), err }
            })?;
        channel.exec(true, command).await.map_err(|err| RunError::Send {
            host: self.host.clone(),
            err,
        })?;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => {
                    stdout.extend_from_slice(data)
                }
                ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    status = Some(exit_status)
                }
                _ => {}
            }
        }
        match status {
            Some(0) => {
                Ok(String::from_utf8_lossy(&stdout).trim().to_string())
            }
            Some(status) => Err(RunError::ExitStatus {
                host: self.host.clone(),
                command: command.to_string(),
                status,
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            }),
            None => Err(RunError::NoExitStatus {
                host: self.host.clone(),
                command: command.to_string(),
            }),
        }
    }

    /// Open a direct-tcpip channel from this session to a port on the
    /// remote host's loopback interface.
    pub(crate) async fn open_direct_tcpip(
        &self,
        port: u16,
    ) -> Result<russh::ChannelStream<client::Msg>, russh::Error> {
        let channel = self
            .handle
            .channel_open_direct_tcpip("127.0.0.1", u32::from(port), "127.0.0.1", 0)
            .await?;
        Ok(channel.into_stream())
    }
}

/// Bounded pool of SSH sessions keyed by `host:port`. The only shared
/// mutable resource across execs; internally synchronized.
pub struct SshPool {
    config: SshConfig,
    client_config: Arc<client::Config>,
    sessions: Mutex<HashMap<String, Arc<SshSession>>>,
    log: Logger,
}

impl SshPool {
    pub fn new(config: SshConfig, log: &Logger) -> Self {
        Self {
            config,
            client_config: Arc::new(client::Config::default()),
            sessions: Mutex::new(HashMap::new()),
            log: log.new(o!("component" => "SshPool")),
        }
    }

    /// Fetch or establish the session for `host:port`.
    pub(crate) async fn session(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Arc<SshSession>, RunError> {
        let key = format!("{host}:{port}");
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&key) {
            if !session.is_closed() {
                return Ok(Arc::clone(session));
            }
            debug!(self.log, "dropping closed ssh session"; "host" => host);
            sessions.remove(&key);
        }
        let session = Arc::new(self.dial(host, port).await?);
        if sessions.len() >= MAX_SESSIONS {
            // Evict an arbitrary entry; sessions re-dial on demand.
            if let Some(evict) = sessions.keys().next().cloned() {
                sessions.remove(&evict);
            }
        }
        sessions.insert(key, Arc::clone(&session));
        Ok(session)
    }

    /// Drop a cached session so the next call re-dials.
    pub(crate) async fn invalidate(&self, host: &str, port: u16) {
        let key = format!("{host}:{port}");
        self.sessions.lock().await.remove(&key);
    }

    async fn dial(&self, host: &str, port: u16) -> Result<SshSession, RunError> {
        debug!(self.log, "dialing ssh"; "host" => host, "port" => port);
        let connect = client::connect(
            Arc::clone(&self.client_config),
            (host, port),
            ClientHandler,
        );
        let mut handle =
            match tokio::time::timeout(self.config.connect_timeout, connect)
                .await
            {
                Ok(Ok(handle)) => handle,
                Ok(Err(err)) => {
                    return Err(RunError::Dial { host: host.to_string(), err })
                }
                Err(_) => {
                    return Err(RunError::Dial {
                        host: host.to_string(),
                        err: russh::Error::ConnectionTimeout,
                    })
                }
            };
        let authenticated = match &self.config.key_path {
            Some(path) => {
                let key = russh_keys::load_secret_key(path.as_std_path(), None)
                    .map_err(|err| RunError::LoadKey {
                        path: path.to_string(),
                        err,
                    })?;
                handle
                    .authenticate_publickey(
                        &self.config.user,
                        Arc::new(key),
                    )
                    .await
                    .map_err(|err| RunError::Dial {
                        host: host.to_string(),
                        err,
                    })?
            }
            None => handle
                .authenticate_none(&self.config.user)
                .await
                .map_err(|err| RunError::Dial {
                    host: host.to_string(),
                    err,
                })?,
        };
        if !authenticated {
            return Err(RunError::AuthRejected {
                user: self.config.user.clone(),
                host: host.to_string(),
            });
        }
        Ok(SshSession { handle, host: host.to_string() })
    }
}

/// [`Runner`] bound to a single remote host through a shared [`SshPool`].
pub struct SshRunner {
    pool: Arc<SshPool>,
    host: String,
    port: u16,
    log: Logger,
}

impl SshRunner {
    pub fn new(pool: Arc<SshPool>, host: &str, port: u16, log: &Logger) -> Self {
        Self {
            pool,
            host: host.to_string(),
            port,
            log: log.new(o!("component" => "SshRunner", "host" => host.to_string())),
        }
    }
}

#[async_trait]
impl Runner for SshRunner {
    async fn run(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        command: &str,
    ) -> Result<String, RunError> {
        debug!(self.log, "run"; "command" => command, "timeout" => ?timeout);
        let attempt = async {
            let session = self.pool.session(&self.host, self.port).await?;
            session.exec(command).await
        };
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(RunError::Cancelled(Cancelled)),
            result = tokio::time::timeout(timeout, attempt) => match result {
                Ok(result) => result,
                Err(_) => Err(RunError::Timeout {
                    host: self.host.clone(),
                    command: command.to_string(),
                    timeout,
                }),
            },
        };
        if let Err(err) = &result {
            if err.retires_session() {
                debug!(self.log, "retiring ssh session"; "err" => %err);
                self.pool.invalidate(&self.host, self.port).await;
            }
        }
        result
    }
}
