//! Retrying of calls that cross a process boundary.
//!
//! A failed attempt is classified by a predicate: retryable failures are
//! logged and retried after the delay prescribed by [`BackoffPolicy`], with
//! no ceiling on the number of attempts. Anything else is returned to the
//! caller untouched.

mod policy;

pub use policy::{BackoffPolicy, Delays};

use crate::error::{error_chain, Transient};
use std::error::Error;
use std::future::Future;
use tracing::{error, info};

/// Retry bookkeeping for a single logical call.
///
/// Useful when the operation needs `&mut` access to its owner and cannot be
/// expressed as a closure:
///
/// ```ignore
/// let mut backoff = Backoff::new(&policy, "DB connection error.");
/// loop {
///     match self.try_fetch().await {
///         Ok(rows) => return Ok(rows),
///         Err(e) => {
///             let retryable = e.is_transient();
///             backoff.on_error(e, retryable).await?
///         }
///     }
/// }
/// ```
pub struct Backoff<'a> {
    policy: &'a BackoffPolicy,
    context: &'a str,
    attempt: u32,
}

impl<'a> Backoff<'a> {
    pub fn new(policy: &'a BackoffPolicy, context: &'a str) -> Self {
        Self {
            policy,
            context,
            attempt: 0,
        }
    }

    /// Number of retries performed so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Handle a failed attempt.
    ///
    /// Returns the error back when it is not retryable. Otherwise logs it
    /// with its whole cause chain, sleeps for the next delay and returns
    /// `Ok(())` so the caller can attempt again.
    pub async fn on_error<E>(&mut self, err: E, retryable: bool) -> Result<(), E>
    where
        E: Error + 'static,
    {
        if !retryable {
            return Err(err);
        }

        self.attempt = self.attempt.saturating_add(1);
        let delay = self.policy.delay(self.attempt);
        error!(
            attempt = self.attempt,
            error = %error_chain(&err),
            "{} Next try in {:?}",
            self.context,
            delay
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    /// Log recovery if at least one retry happened.
    pub fn on_success(&self) {
        if self.attempt > 0 {
            info!(
                "{} Recovered after {} retries",
                self.context, self.attempt
            );
        }
    }
}

/// Run `op` until it succeeds or fails with an error `is_retryable` rejects.
pub async fn retry<T, E, F, Fut, P>(
    policy: &BackoffPolicy,
    context: &str,
    is_retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Error + 'static,
{
    let mut backoff = Backoff::new(policy, context);
    loop {
        match op().await {
            Ok(value) => {
                backoff.on_success();
                return Ok(value);
            }
            Err(err) => {
                let retryable = is_retryable(&err);
                backoff.on_error(err, retryable).await?;
            }
        }
    }
}

/// [`retry`] using the error's own [`Transient`] classification.
pub async fn retry_transient<T, E, F, Fut>(
    policy: &BackoffPolicy,
    context: &str,
    op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Error + 'static,
{
    retry(policy, context, |e: &E| e.is_transient(), op).await
}
