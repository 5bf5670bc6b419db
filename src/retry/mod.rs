//! Retry decisions and backoff timing.
//!
//! The policy decides, given the failed attempt's retryability and the
//! remaining deadline budget, whether to wait and go again or stop.
//! Attempts are bounded per tool; the overall deadline wins over remaining
//! attempts, and a wait that would cross it stops the loop so the caller
//! can surface a timeout instead of sleeping past its budget.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub kind: BackoffKind,
    pub initial: Duration,
    pub max: Duration,
    /// Add up to 30% random slack to each delay. Off by default so tests
    /// stay deterministic.
    pub jitter: bool,
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            initial: delay,
            max: delay,
            jitter: false,
        }
    }

    /// Doubling delays starting at `initial`, capped at `max`.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            initial,
            max,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Delay before the attempt after `attempt` failures (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = match self.kind {
            BackoffKind::Fixed => self.initial,
            BackoffKind::Exponential => {
                let mult = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                self.initial.checked_mul(mult).unwrap_or(self.max).min(self.max)
            }
        };
        if self.jitter {
            use rand::Rng;
            let slack = rand::thread_rng().gen_range(0.0..0.3);
            base + base.mul_f64(slack)
        } else {
            base
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(100), Duration::from_secs(10))
    }
}

/// What the dispatcher should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then try again.
    Retry(Duration),
    /// Give up and surface the attempt's error.
    Stop,
    /// Give up because the next wait would cross the deadline; the caller
    /// surfaces a timeout instead of the attempt's error.
    DeadlineExhausted,
}

/// Per-dispatch retry policy: a per-tool attempt bound plus a shared
/// backoff schedule.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Decide after attempt number `attempt` (0-based) failed.
    pub fn decide(&self, attempt: u32, retryable: bool, remaining: Duration) -> RetryDecision {
        if !retryable || attempt >= self.max_retries {
            return RetryDecision::Stop;
        }
        let delay = self.backoff.delay_for_attempt(attempt);
        if delay >= remaining {
            return RetryDecision::DeadlineExhausted;
        }
        RetryDecision::Retry(delay)
    }
}
