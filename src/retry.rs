//! Retry with capped exponential backoff.
//!
//! [`with_retry`] wraps one remote operation. Transient failures are retried
//! up to `max_attempts` times; permanent and fatal failures return at once.
//! When the attempts run out the last transient error is turned into
//! [`SyncError::Exhausted`], which callers record against the affected
//! chunks rather than aborting the run.
//!
//! Delays follow `min(max_delay, base_delay * 2^(n-1))` with uniform
//! `±jitter_ratio` jitter. A server retry hint replaces the computed delay.
//! Every delay is clamped to `max_delay` and is never shorter than the one
//! before it.
//!
//! [`with_retry_until`] also watches a [`CancellationToken`]: once it is
//! cancelled no further attempt starts, and throttle waits and backoff
//! sleeps end early with [`SyncError::Cancelled`].

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::SyncError;
use crate::throttle::{CallOutcome, ThrottleController};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
            attempt_timeout: config.attempt_timeout(),
        }
    }

    /// Un-jittered delay after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Delay before the next attempt.
    ///
    /// `hint` is a server-supplied retry-after; `previous` is the delay used
    /// before the current attempt, or zero for the first retry.
    pub fn delay_for<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        hint: Option<Duration>,
        previous: Duration,
        rng: &mut R,
    ) -> Duration {
        let delay = match hint {
            Some(hint) => hint,
            None => {
                let base = self.backoff(attempt);
                if self.jitter_ratio > 0.0 {
                    let factor = 1.0 + rng.gen_range(-self.jitter_ratio..=self.jitter_ratio);
                    base.mul_f64(factor.max(0.0))
                } else {
                    base
                }
            }
        };
        delay.max(previous).min(self.max_delay)
    }
}

/// Run `op` under `policy`, waiting on `throttle` before every attempt and
/// reporting every outcome back to it.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    throttle: Option<&ThrottleController>,
    op: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let never = CancellationToken::new();
    with_retry_until(operation, policy, throttle, &never, |_| {}, op).await
}

/// [`with_retry`] that gives up with [`SyncError::Cancelled`] as soon as
/// `cancel` fires. `on_retry` sees each failure that is about to be retried.
///
/// The first attempt waits for the throttle's full pacing. Later attempts
/// have already slept their backoff, so they only wait out what is left of
/// the shared pause window.
pub async fn with_retry_until<T, R, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    throttle: Option<&ThrottleController>,
    cancel: &CancellationToken,
    mut on_retry: R,
    mut op: F,
) -> Result<T, SyncError>
where
    R: FnMut(&SyncError),
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt = 0u32;
    let mut previous = Duration::ZERO;

    loop {
        attempt += 1;
        if let Some(throttle) = throttle {
            let wait = async {
                if attempt == 1 {
                    throttle.wait().await
                } else {
                    throttle.wait_pause().await
                }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = wait => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let result = match policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, op()).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::transient(format!(
                    "attempt timed out after {}s",
                    limit.as_secs_f64()
                ))),
            },
            None => op().await,
        };

        if let Some(throttle) = throttle {
            if let Some(outcome) = CallOutcome::from_result(&result) {
                throttle.after_call(outcome);
            }
        }

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        if attempt >= policy.max_attempts {
            warn!(operation, attempts = attempt, error = %err, "giving up");
            return Err(SyncError::Exhausted {
                attempts: attempt,
                last: err.reason(),
            });
        }

        let delay = {
            let mut rng = rand::thread_rng();
            policy.delay_for(attempt, err.retry_after(), previous, &mut rng)
        };
        previous = delay;
        on_retry(&err);

        warn!(
            operation,
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
