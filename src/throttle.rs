//! Adaptive throttle shared by every worker of a sync run.
//!
//! All workers talk to the same remote quota, so when one of them is rate
//! limited every other worker should slow down too. The controller keeps a
//! pacing delay that each call waits before it is issued, plus a global
//! pause window that a rate-limit signal pushes out for everyone.
//!
//! This is separate from per-call retry backoff ([`crate::retry`]): backoff
//! spaces out the attempts of one failing call, the throttle spreads
//! sustained pressure across the whole worker pool.
//!
//! # Adaptation
//!
//! - rate limited: pacing doubles (starting at `initial_pause`) and is
//!   capped at `max_pause`. The pause window moves to `now + max(pacing,
//!   hint)`, the hint also capped at `max_pause`. A hint only holds the
//!   window open; it never becomes the pacing of later calls.
//! - `decay_after` consecutive successes halve the pacing delay; once it
//!   drops below `initial_pause` it snaps back to zero.
//! - other transient failures only reset the success streak.
//!
//! A fresh call waits for the larger of pacing and the pause window. A
//! retry has already slept its own backoff, so it waits only for whatever
//! is left of the pause window ([`ThrottleController::wait_pause`]).
//!
//! A controller lives for exactly one run; the engine creates a fresh one
//! per run and drops it at the end.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ThrottleConfig;
use crate::error::SyncError;

/// What a remote call reported, as seen by the throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    RateLimited { retry_after: Option<Duration> },
    Transient,
}

impl CallOutcome {
    /// Map a call result to a throttle outcome.
    ///
    /// Permanent rejections still mean the service answered normally, so
    /// they count as success. Fatal errors and cancellation carry no pacing
    /// signal.
    pub fn from_result<T>(result: &Result<T, SyncError>) -> Option<Self> {
        match result {
            Ok(_) | Err(SyncError::Permanent(_)) => Some(CallOutcome::Success),
            Err(SyncError::Transient {
                rate_limited: true,
                retry_after,
                ..
            }) => Some(CallOutcome::RateLimited {
                retry_after: *retry_after,
            }),
            Err(SyncError::Transient { .. }) | Err(SyncError::Exhausted { .. }) => {
                Some(CallOutcome::Transient)
            }
            Err(SyncError::Fatal(_)) | Err(SyncError::Cancelled) => None,
        }
    }
}

/// Point-in-time view of the throttle, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleSnapshot {
    pub pace: Duration,
    pub pause_remaining: Duration,
    pub overload_signals: u32,
    pub success_streak: u32,
}

#[derive(Debug, Default)]
struct ThrottleState {
    pace: Duration,
    paused_until: Option<Instant>,
    overload_signals: u32,
    success_streak: u32,
}

/// Process-wide pacing state for one sync run.
#[derive(Debug)]
pub struct ThrottleController {
    enabled: bool,
    initial_pause: Duration,
    max_pause: Duration,
    decay_after: u32,
    state: Mutex<ThrottleState>,
}

impl ThrottleController {
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            enabled: config.enabled,
            initial_pause: Duration::from_millis(config.initial_pause_ms.max(1)),
            max_pause: Duration::from_millis(config.max_pause_ms),
            decay_after: config.decay_after.max(1),
            state: Mutex::new(ThrottleState::default()),
        }
    }

    /// A controller that never delays.
    pub fn disabled() -> Self {
        Self::new(&ThrottleConfig {
            enabled: false,
            ..ThrottleConfig::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// How long the next caller should wait before issuing its call.
    pub fn before_call(&self) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        let state = self.state();
        pause_remaining(&state, Instant::now()).max(state.pace)
    }

    /// Sleep for [`before_call`](Self::before_call), then keep waiting while
    /// another worker extends the pause window. Returns the total wait.
    pub async fn wait(&self) -> Duration {
        let delay = self.before_call();
        self.sleep_through(delay).await
    }

    /// Wait only while the shared pause window is open, ignoring pacing.
    pub async fn wait_pause(&self) -> Duration {
        let delay = self.pause_remaining();
        self.sleep_through(delay).await
    }

    async fn sleep_through(&self, mut delay: Duration) -> Duration {
        let mut waited = Duration::ZERO;
        while !delay.is_zero() {
            tokio::time::sleep(delay).await;
            waited += delay;
            delay = self.pause_remaining();
        }
        waited
    }

    fn pause_remaining(&self) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        pause_remaining(&self.state(), Instant::now())
    }

    /// Record the outcome of a remote call.
    pub fn after_call(&self, outcome: CallOutcome) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        let mut state = self.state();
        match outcome {
            CallOutcome::Success => {
                state.success_streak += 1;
                if state.success_streak >= self.decay_after && !state.pace.is_zero() {
                    state.success_streak = 0;
                    let halved = state.pace / 2;
                    if halved < self.initial_pause {
                        state.pace = Duration::ZERO;
                        state.overload_signals = 0;
                    } else {
                        state.pace = halved;
                    }
                }
            }
            CallOutcome::RateLimited { retry_after } => {
                state.overload_signals += 1;
                state.success_streak = 0;
                let pace = if state.pace.is_zero() {
                    self.initial_pause
                } else {
                    state.pace.saturating_mul(2)
                };
                state.pace = pace.min(self.max_pause);

                let hold = retry_after
                    .unwrap_or(Duration::ZERO)
                    .max(state.pace)
                    .min(self.max_pause);
                let until = now + hold;
                if state.paused_until.map_or(true, |current| until > current) {
                    state.paused_until = Some(until);
                }
            }
            CallOutcome::Transient => {
                state.success_streak = 0;
            }
        }
    }

    pub fn snapshot(&self) -> ThrottleSnapshot {
        let state = self.state();
        ThrottleSnapshot {
            pace: state.pace,
            pause_remaining: pause_remaining(&state, Instant::now()),
            overload_signals: state.overload_signals,
            success_streak: state.success_streak,
        }
    }

    fn state(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn pause_remaining(state: &ThrottleState, now: Instant) -> Duration {
    state
        .paused_until
        .map(|until| until.saturating_duration_since(now))
        .unwrap_or(Duration::ZERO)
}
