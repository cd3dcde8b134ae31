// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Forward tunnels to servod ports.
//!
//! servod listens on the servo-host's loopback interface only, so the
//! XML-RPC client reaches it by accepting TCP connections on a local
//! loopback port and piping each one through a direct-tcpip channel on the
//! host's SSH session.

use crate::error::TunnelError;
use crate::ssh::SshPool;
use slog::debug;
use slog::o;
use slog::warn;
use slog::Logger;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running forward tunnel. Dropping (or closing) the tunnel stops the
/// accept loop and tears down every accepted connection.
pub struct ForwardTunnel {
    local_addr: SocketAddr,
    host: String,
    port: u16,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
}

impl ForwardTunnel {
    /// Open a tunnel to `port` on `host`.
    ///
    /// The remote port is probed with one direct-tcpip dial before the local
    /// listener starts, so an unreachable servod surfaces as
    /// [`TunnelError::TransportUnavailable`] here rather than as a hung
    /// HTTP request later.
    pub async fn open(
        pool: Arc<SshPool>,
        host: &str,
        ssh_port: u16,
        port: u16,
        log: &Logger,
    ) -> Result<Self, TunnelError> {
        let log = log.new(o!(
            "component" => "ForwardTunnel",
            "host" => host.to_string(),
            "port" => port,
        ));
        let session = pool.session(host, ssh_port).await?;
        let probe = session.open_direct_tcpip(port).await.map_err(|err| {
            TunnelError::TransportUnavailable {
                host: host.to_string(),
                port,
                err,
            }
        })?;
        drop(probe);

        let listener =
            TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.map_err(TunnelError::Bind)?;
        let local_addr = listener.local_addr().map_err(TunnelError::Bind)?;
        debug!(log, "tunnel listening"; "local_addr" => %local_addr);

        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            pool,
            host.to_string(),
            ssh_port,
            port,
            shutdown.clone(),
            log,
        ));
        Ok(Self {
            local_addr,
            host: host.to_string(),
            port,
            shutdown,
            accept_task,
        })
    }

    /// Loopback address HTTP clients should connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting and close all piped connections.
    pub fn close(&self) {
        self.shutdown.cancel();
        self.accept_task.abort();
    }
}

impl Drop for ForwardTunnel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(
    listener: TcpListener,
    pool: Arc<SshPool>,
    host: String,
    ssh_port: u16,
    port: u16,
    shutdown: CancellationToken,
    log: Logger,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        let (mut tcp, peer) = match accepted {
            Ok(conn) => conn,
            Err(err) => {
                warn!(log, "tunnel accept failed"; "err" => %err);
                continue;
            }
        };
        debug!(log, "tunnel connection accepted"; "peer" => %peer);
        let pool = Arc::clone(&pool);
        let host = host.clone();
        let log = log.clone();
        let conn_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let session = match pool.session(&host, ssh_port).await {
                Ok(session) => session,
                Err(err) => {
                    warn!(log, "tunnel ssh session lost"; "err" => %err);
                    return;
                }
            };
            let mut stream = match session.open_direct_tcpip(port).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(log, "tunnel channel open failed"; "err" => %err);
                    return;
                }
            };
            tokio::select! {
                _ = conn_shutdown.cancelled() => {}
                result = tokio::io::copy_bidirectional(&mut tcp, &mut stream) => {
                    if let Err(err) = result {
                        debug!(log, "tunnel connection ended"; "err" => %err);
                    }
                }
            }
        });
    }
}
