//! Configuration for the state manager.

use otsync_core::OtError;
use rand::Rng;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decides when a failed push is attempted again.
///
/// `attempt` counts the attempts made so far, starting at 1. Returning
/// `None` aborts the push with `last_error`.
pub trait RetryPolicy: Send + Sync + Debug {
    /// Returns the instant of the next attempt, or `None` to give up.
    fn next_attempt(
        &self,
        attempt: u32,
        last_error: &OtError,
        first_attempt: Instant,
        now: Instant,
    ) -> Option<Instant>;
}

/// Backoff schedule of the push loop.
///
/// Attempt 1 is the first push of a candidate. When attempt `n` fails, the
/// loop waits [`backoff_after(n)`](Self::backoff_after) before attempt
/// `n + 1`: `initial_backoff` after the first failure, multiplied by
/// `backoff_multiplier` after each further one and capped at `max_backoff`.
/// A push rejected for a moved head has already been rebased when the wait
/// starts, so the wait only spaces out contention with other replicas.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Push attempts per candidate, the first one included.
    pub max_attempts: u32,
    /// Wait after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound of a single wait.
    pub max_backoff: Duration,
    /// Growth factor between consecutive waits.
    pub backoff_multiplier: f64,
    /// Stretch each wait by up to 25% so replicas that collided once do not
    /// collide again.
    pub jitter: bool,
    /// No attempt is scheduled later than this after the first one.
    pub max_elapsed: Option<Duration>,
}

impl RetryConfig {
    /// Allows `max_attempts` pushes with a 100 ms initial backoff doubling
    /// up to 30 s.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            max_elapsed: None,
        }
    }

    /// Gives up after the first failed push.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
            max_elapsed: None,
        }
    }

    /// Sets the wait after the first failed attempt.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Caps a single wait.
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Sets the growth factor between waits.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Bounds the time between the first attempt and the last scheduled one.
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    /// Returns the wait after `failed` failed attempts. Zero before any.
    pub fn backoff_after(&self, failed: u32) -> Duration {
        let Some(exponent) = failed.checked_sub(1) else {
            return Duration::ZERO;
        };
        let secs = (self.initial_backoff.as_secs_f64()
            * self.backoff_multiplier.powi(exponent.min(i32::MAX as u32) as i32))
        .min(self.max_backoff.as_secs_f64());

        if self.jitter {
            let stretch = 1.0 + 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(secs * stretch)
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

impl RetryPolicy for RetryConfig {
    fn next_attempt(
        &self,
        attempt: u32,
        last_error: &OtError,
        first_attempt: Instant,
        now: Instant,
    ) -> Option<Instant> {
        if !last_error.is_retryable() || attempt >= self.max_attempts {
            return None;
        }
        let next = now + self.backoff_after(attempt);
        match self.max_elapsed {
            Some(budget) if next.duration_since(first_attempt) > budget => None,
            _ => Some(next),
        }
    }
}

/// Configuration for an [`OtStateManager`](crate::OtStateManager).
#[derive(Debug, Clone)]
pub struct StateManagerConfig {
    /// Retry policy of the push loop.
    pub retry: Arc<dyn RetryPolicy>,
    /// Interval between fetches in poll mode.
    pub poll_interval: Duration,
}

impl StateManagerConfig {
    /// Creates a configuration with default retries and a one second poll
    /// interval.
    pub fn new() -> Self {
        Self {
            retry: Arc::new(RetryConfig::default()),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: impl RetryPolicy + 'static) -> Self {
        self.retry = Arc::new(retry);
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}
