//! Connection retry with linearly growing backoff, shared by the agent's
//! report path and the relational repository.

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::time::Duration;

/// Retry budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of retries after the first failed call.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Wait before the first retry.
    #[serde(default = "default_start_after", with = "duration_secs")]
    pub start_after: Duration,
    /// Added to the wait after every failed retry.
    #[serde(default = "default_grows_delta", with = "duration_secs")]
    pub grows_delta: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            start_after: default_start_after(),
            grows_delta: default_grows_delta(),
        }
    }
}

fn default_attempts() -> u32 {
    3
}

fn default_start_after() -> Duration {
    Duration::from_secs(1)
}

fn default_grows_delta() -> Duration {
    Duration::from_secs(2)
}

/// Serde adapter for `Duration` written as a (fractional) number of seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Returns true when `err`, or anything in its source chain, is a refused
/// TCP connection.
///
/// Drivers that flatten their causes into strings are matched on the message
/// text as well.
pub fn is_connection_refused(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        if e.to_string().to_ascii_lowercase().contains("connection refused") {
            return true;
        }
        current = e.source();
    }
    false
}

/// Retries an operation while it fails with "connection refused".
///
/// The operation runs once; a refused connection is retried up to
/// `policy.attempts` more times, sleeping `start_after`, then
/// `start_after + grows_delta`, and so on. Any other failure, on the first
/// call or a retry, is returned immediately. Exhausting the budget returns the
/// last error.
///
/// # Examples
///
/// ```
/// use rtmon_common::retry::{ConnRetrier, RetryPolicy};
/// use std::time::Duration;
///
/// # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
/// # rt.block_on(async {
/// let retrier = ConnRetrier::new(RetryPolicy {
///     attempts: 2,
///     start_after: Duration::from_millis(1),
///     grows_delta: Duration::from_millis(1),
/// });
/// let out: Result<u8, std::io::Error> = retrier.run(|| async { Ok(7) }).await;
/// assert_eq!(out.unwrap(), 7);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct ConnRetrier {
    policy: RetryPolicy,
}

impl ConnRetrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + 'static,
    {
        self.run_when(|e: &E| is_connection_refused(e), op).await
    }

    /// Like [`run`](Self::run), but `retryable` decides which failures are
    /// transient. Backends whose drivers hide the refusal behind their own
    /// error (a pool acquire timeout, for one) classify it here.
    pub async fn run_when<T, E, F, Fut, P>(&self, retryable: P, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let err = match op().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if !retryable(&err) {
            return Err(err);
        }

        let mut last = err;
        let mut wait = self.policy.start_after;
        for _ in 0..self.policy.attempts {
            tracing::info!(
                wait_secs = wait.as_secs_f64(),
                error = %last,
                "cannot connect, next try in {:.1}s",
                wait.as_secs_f64()
            );
            tokio::time::sleep(wait).await;
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if retryable(&e) => last = e,
                Err(e) => return Err(e),
            }
            wait += self.policy.grows_delta;
        }
        Err(last)
    }
}
