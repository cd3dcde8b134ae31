// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Retry primitives. Every retry loop in this workspace maps onto one of
//! the two functions here; both honor cancellation between attempts and
//! never mask the final failure.

use crate::Cancelled;
use slog::debug;
use slog::Logger;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// All attempts failed; carries the last attempt's error.
    #[error("{name} failed after {attempts} attempt(s)")]
    Exhausted {
        name: String,
        attempts: usize,
        #[source]
        last: E,
    },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl<E> RetryError<E> {
    /// The last attempt's error, when the retry budget was exhausted.
    pub fn into_last(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Cancelled(_) => None,
        }
    }
}

/// Sleep for `delay`, returning early with an error on cancellation.
pub async fn sleep(
    cancel: &CancellationToken,
    delay: Duration,
) -> Result<(), Cancelled> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Run `f` up to `attempts` times with `delay` between attempts.
pub async fn limit_count<T, E, F, Fut>(
    cancel: &CancellationToken,
    attempts: usize,
    delay: Duration,
    name: &str,
    log: &Logger,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);
    let mut last = None;
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled(Cancelled));
        }
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                debug!(
                    log, "attempt failed";
                    "name" => name,
                    "attempt" => attempt,
                    "of" => attempts,
                    "err" => %err,
                );
                last = Some(err);
            }
        }
        if attempt < attempts {
            sleep(cancel, delay).await?;
        }
    }
    // `last` is always set here: attempts >= 1 and every failed attempt
    // stores its error.
    match last {
        Some(last) => {
            Err(RetryError::Exhausted { name: name.to_string(), attempts, last })
        }
        None => Err(RetryError::Cancelled(Cancelled)),
    }
}

/// Run `f` repeatedly with `interval` between attempts until it succeeds or
/// `timeout` elapses.
pub async fn with_timeout<T, E, F, Fut>(
    cancel: &CancellationToken,
    interval: Duration,
    timeout: Duration,
    name: &str,
    log: &Logger,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let deadline = Instant::now() + timeout;
    let mut attempts = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled(Cancelled));
        }
        attempts += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                debug!(
                    log, "attempt failed";
                    "name" => name,
                    "attempt" => attempts,
                    "err" => %err,
                );
                if Instant::now() + interval >= deadline {
                    return Err(RetryError::Exhausted {
                        name: name.to_string(),
                        attempts,
                        last: err,
                    });
                }
            }
        }
        sleep(cancel, interval).await?;
    }
}
