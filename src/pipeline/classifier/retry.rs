//! Bounded retry policy and the clock it sleeps on.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::ClassificationError;
use crate::pipeline::cancel::CancellationToken;

/// Sleep granularity for cancellation responsiveness.
const SLEEP_GRANULARITY: Duration = Duration::from_millis(50);

/// How the delay grows between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Always `failure_delay`.
    Fixed,
    /// `failure_delay * 2^(n-1)` after the n-th failure, capped at `max_delay`.
    Exponential { max_delay: Duration },
}

/// Attempt budget and timing for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per unit, including the first.
    pub max_attempts: u32,
    /// Pause after a successful attempt (rate limiting).
    pub success_delay: Duration,
    /// Base pause after a failed attempt.
    pub failure_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            success_delay: Duration::ZERO,
            failure_delay: Duration::from_secs(1),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failed_attempt`-th failure (1-based).
    pub fn failure_delay_for(&self, failed_attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.failure_delay,
            Backoff::Exponential { max_delay } => {
                let exp = failed_attempt.saturating_sub(1).min(31);
                self.failure_delay
                    .checked_mul(1u32 << exp)
                    .unwrap_or(max_delay)
                    .min(max_delay)
            }
        }
    }
}

/// Clock abstraction so retry timing can be tested without waiting.
pub trait Sleeper: Send + Sync {
    /// Sleep for `duration` unless `cancel` trips first.
    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), ClassificationError>;
}

impl<T: Sleeper + ?Sized> Sleeper for Arc<T> {
    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), ClassificationError> {
        (**self).sleep(duration, cancel)
    }
}

/// Real sleeper: sleeps in small increments, checking for cancellation.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), ClassificationError> {
        let until = Instant::now() + duration;
        loop {
            if cancel.is_cancelled() {
                return Err(ClassificationError::Cancelled);
            }
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            std::thread::sleep((until - now).min(SLEEP_GRANULARITY));
        }
    }
}

/// Fake clock for testing — records requested sleeps, returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), ClassificationError> {
        if cancel.is_cancelled() {
            return Err(ClassificationError::Cancelled);
        }
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
        Ok(())
    }
}
