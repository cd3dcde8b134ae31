// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed facade over servod's XML-RPC interface.

use crate::error::Cancelled;
use crate::error::ServodError;
use crate::ssh::SshPool;
use crate::tunnel::ForwardTunnel;
use crate::MIN_SERVOD_PORT;
use async_trait::async_trait;
use recovery_types::ServoHost;
use servod_protocol::decode_response;
use servod_protocol::encode_request;
use servod_protocol::Value;
use slog::debug;
use slog::o;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-call timeout applied when the caller does not specify one.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Narrow typed API over servod.
///
/// `get`/`set`/`has` cover the servod control surface; `call` is the escape
/// hatch for method names beyond the CRUD triple. Provided methods delegate
/// to `call`, so fakes only need to implement that one.
#[async_trait]
pub trait Servod: Send + Sync {
    async fn call(
        &self,
        cancel: &CancellationToken,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ServodError>;

    /// Request the value of a servod control.
    async fn get(
        &self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<Value, ServodError> {
        if command.is_empty() {
            return Err(ServodError::EmptyCommand);
        }
        self.call(cancel, "get", vec![Value::from(command)]).await
    }

    /// Set a servod control.
    async fn set(
        &self,
        cancel: &CancellationToken,
        command: &str,
        value: Value,
    ) -> Result<(), ServodError> {
        if command.is_empty() {
            return Err(ServodError::EmptyCommand);
        }
        self.call(cancel, "set", vec![Value::from(command), value]).await?;
        Ok(())
    }

    /// Verify a control is known to servod; a `doc` fault means it is not.
    async fn has(
        &self,
        cancel: &CancellationToken,
        command: &str,
    ) -> Result<(), ServodError> {
        if command.is_empty() {
            return Err(ServodError::EmptyCommand);
        }
        self.call(cancel, "doc", vec![Value::from(command)]).await?;
        Ok(())
    }
}

fn wrong_type(
    command: &str,
    expected: &'static str,
    got: &Value,
) -> ServodError {
    ServodError::WrongType {
        command: command.to_string(),
        expected,
        got: got.type_name(),
    }
}

/// `get` a control and require a string result.
pub async fn get_string(
    servod: &dyn Servod,
    cancel: &CancellationToken,
    command: &str,
) -> Result<String, ServodError> {
    let value = servod.get(cancel, command).await?;
    match value.as_str() {
        Some(s) => Ok(s.to_string()),
        None => Err(wrong_type(command, "string", &value)),
    }
}

/// `get` a control and require an int result.
pub async fn get_int(
    servod: &dyn Servod,
    cancel: &CancellationToken,
    command: &str,
) -> Result<i32, ServodError> {
    let value = servod.get(cancel, command).await?;
    value.as_int().ok_or_else(|| wrong_type(command, "int", &value))
}

/// `get` a control and require a boolean result.
pub async fn get_bool(
    servod: &dyn Servod,
    cancel: &CancellationToken,
    command: &str,
) -> Result<bool, ServodError> {
    let value = servod.get(cancel, command).await?;
    value.as_bool().ok_or_else(|| wrong_type(command, "boolean", &value))
}

/// `get` a control and require a double result.
pub async fn get_double(
    servod: &dyn Servod,
    cancel: &CancellationToken,
    command: &str,
) -> Result<f64, ServodError> {
    let value = servod.get(cancel, command).await?;
    value.as_double().ok_or_else(|| wrong_type(command, "double", &value))
}

/// XML-RPC client bound to one servod instance, reached through a forward
/// tunnel on the servo-host's SSH session. Closing the client closes the
/// tunnel.
pub struct ServodClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
    // Owned for its Drop side effect: the tunnel lives as long as the client.
    _tunnel: ForwardTunnel,
    log: Logger,
}

impl ServodClient {
    /// Open a client for the servod on `host`'s servo-host record,
    /// enforcing the servod-port invariant.
    pub async fn open(
        pool: Arc<SshPool>,
        host: &ServoHost,
        timeout: Duration,
        log: &Logger,
    ) -> Result<Self, ServodError> {
        if host.servod_port <= MIN_SERVOD_PORT {
            return Err(ServodError::BadPort(host.servod_port));
        }
        let tunnel = ForwardTunnel::open(
            pool,
            &host.name,
            host.ssh_port,
            host.servod_port,
            log,
        )
        .await?;
        let url = format!("http://{}/", tunnel.local_addr());
        let log = log.new(o!(
            "component" => "ServodClient",
            "host" => host.name.clone(),
            "servod_port" => host.servod_port,
        ));
        Ok(Self {
            http: reqwest::Client::new(),
            url,
            timeout,
            _tunnel: tunnel,
            log,
        })
    }
}

#[async_trait]
impl Servod for ServodClient {
    async fn call(
        &self,
        cancel: &CancellationToken,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ServodError> {
        debug!(self.log, "servod call"; "method" => method);
        let body = encode_request(method, &args)?;
        let request = self
            .http
            .post(&self.url)
            .header("Content-Type", "text/xml")
            .timeout(self.timeout)
            .body(body);
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ServodError::Cancelled(Cancelled)),
            response = request.send() => response?,
        };
        let text = tokio::select! {
            _ = cancel.cancelled() => return Err(ServodError::Cancelled(Cancelled)),
            text = response.text() => text?,
        };
        Ok(decode_response(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Fake that records calls and plays back queued results.
    struct FakeServod {
        calls: Mutex<Vec<(String, Vec<Value>)>>,
        results: Mutex<Vec<Result<Value, ServodError>>>,
    }

    impl FakeServod {
        fn new(results: Vec<Result<Value, ServodError>>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                results: Mutex::new(results),
            }
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
            self.calls.lock().unwrap().push((method.to_string(), args));
            self.results.lock().unwrap().remove(0)
        }
    }

    #[tokio::test]
    async fn get_rejects_empty_command() {
        let fake = FakeServod::new(vec![]);
        let cancel = CancellationToken::new();
        assert!(matches!(
            fake.get(&cancel, "").await,
            Err(ServodError::EmptyCommand)
        ));
        assert!(matches!(
            fake.set(&cancel, "", Value::from("x")).await,
            Err(ServodError::EmptyCommand)
        ));
    }

    #[tokio::test]
    async fn has_uses_doc() {
        let fake = FakeServod::new(vec![Ok(Value::from("docstring"))]);
        let cancel = CancellationToken::new();
        fake.has(&cancel, "servo_pd_role").await.unwrap();
        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls[0].0, "doc");
        assert_eq!(calls[0].1, vec![Value::from("servo_pd_role")]);
    }

    #[tokio::test]
    async fn scalar_helpers_enforce_types() {
        let fake = FakeServod::new(vec![
            Ok(Value::from("snk")),
            Ok(Value::from(2750.0)),
            Ok(Value::from("snk")),
        ]);
        let cancel = CancellationToken::new();
        assert_eq!(
            get_string(&fake, &cancel, "servo_pd_role").await.unwrap(),
            "snk"
        );
        assert_eq!(
            get_double(&fake, &cancel, "servo_dut_sbu1_mv").await.unwrap(),
            2750.0
        );
        match get_int(&fake, &cancel, "servo_pd_role").await {
            Err(ServodError::WrongType { expected, got, .. }) => {
                assert_eq!(expected, "int");
                assert_eq!(got, "string");
            }
            other => panic!("expected type mismatch, got {other:?}"),
        }
    }
}
