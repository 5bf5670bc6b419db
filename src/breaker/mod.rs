//! Per-endpoint circuit breaking.
//!
//! What this module provides
//! - A three-state breaker (`Closed`, `Open`, `HalfOpen`) per endpoint
//!   address, shared by every call to that endpoint
//! - `BreakerSet`, the keyed store the dispatcher consults before each
//!   attempt and feeds with each real call outcome
//!
//! Transition protocol
//! - `Closed` opens after `failure_threshold` consecutive failures
//! - `Open` short-circuits until the cool-down elapses, then the next
//!   admission flips to `HalfOpen` and is allowed through
//! - `HalfOpen` closes after `success_threshold` consecutive successes and
//!   reopens on any failure, re-stamping the transition time
//!
//! Short-circuited calls feed no transition; only real call outcomes do.
//! Keyed by endpoint address rather than tool name so a registry reload
//! that keeps an address also keeps its failure history.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Breaker thresholds carried by a tool definition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures in `Closed` before the breaker opens.
    pub failure_threshold: u32,
    /// Consecutive successes in `HalfOpen` before the breaker closes.
    pub success_threshold: u32,
    /// How long `Open` short-circuits before allowing a trial call.
    pub cool_down: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cool_down: Duration::from_secs(30),
        }
    }
}

/// Current mode of one endpoint's breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerMode {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    mode: BreakerMode,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            mode: BreakerMode::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
        }
    }

    fn open(&mut self, now: Instant) {
        self.mode = BreakerMode::Open;
        self.opened_at = Some(now);
        self.consecutive_successes = 0;
    }
}

/// Keyed store of breaker state, one entry per endpoint address.
#[derive(Debug, Default)]
pub struct BreakerSet {
    states: Mutex<HashMap<String, BreakerState>>,
}

impl BreakerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a call to `endpoint` may proceed right now.
    ///
    /// In `Open`, the first admission after the cool-down flips the breaker
    /// to `HalfOpen` and is allowed through as the trial call.
    pub async fn admit(&self, endpoint: &str, cfg: BreakerConfig) -> bool {
        let now = Instant::now();
        let mut states = self.states.lock().await;
        let state = states
            .entry(endpoint.to_string())
            .or_insert_with(BreakerState::new);
        match state.mode {
            BreakerMode::Closed | BreakerMode::HalfOpen => true,
            BreakerMode::Open => {
                let opened_at = state.opened_at.unwrap_or(now);
                if now.saturating_duration_since(opened_at) >= cfg.cool_down {
                    state.mode = BreakerMode::HalfOpen;
                    state.consecutive_successes = 0;
                    debug!(endpoint, "circuit half-open, admitting trial call");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Feed a successful call outcome.
    pub async fn record_success(&self, endpoint: &str, cfg: BreakerConfig) {
        let mut states = self.states.lock().await;
        let state = states
            .entry(endpoint.to_string())
            .or_insert_with(BreakerState::new);
        match state.mode {
            BreakerMode::Closed => {
                state.consecutive_failures = 0;
            }
            BreakerMode::HalfOpen => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= cfg.success_threshold {
                    state.mode = BreakerMode::Closed;
                    state.consecutive_failures = 0;
                    debug!(endpoint, "circuit closed");
                }
            }
            // No admitted call can report from Open
            BreakerMode::Open => {}
        }
    }

    /// Feed a failed call outcome.
    pub async fn record_failure(&self, endpoint: &str, cfg: BreakerConfig) {
        let now = Instant::now();
        let mut states = self.states.lock().await;
        let state = states
            .entry(endpoint.to_string())
            .or_insert_with(BreakerState::new);
        match state.mode {
            BreakerMode::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= cfg.failure_threshold {
                    state.open(now);
                    debug!(endpoint, failures = state.consecutive_failures, "circuit opened");
                }
            }
            BreakerMode::HalfOpen => {
                state.open(now);
                debug!(endpoint, "trial call failed, circuit reopened");
            }
            BreakerMode::Open => {}
        }
    }

    /// Current mode for an endpoint; `Closed` if it has never been seen.
    pub async fn mode(&self, endpoint: &str) -> BreakerMode {
        self.states
            .lock()
            .await
            .get(endpoint)
            .map(|s| s.mode)
            .unwrap_or(BreakerMode::Closed)
    }

    /// Drop state for endpoints not in `live`. Run after a registry reload
    /// so breakers for retired addresses do not accumulate.
    pub async fn retain(&self, live: &HashSet<String>) {
        self.states
            .lock()
            .await
            .retain(|addr, _| live.contains(addr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const CFG: BreakerConfig = BreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        cool_down: Duration::from_secs(30),
    };

    #[tokio::test(start_paused = true)]
    async fn opens_after_consecutive_failures() {
        let set = BreakerSet::new();
        for _ in 0..2 {
            assert!(set.admit("svc:1", CFG).await);
            set.record_failure("svc:1", CFG).await;
        }
        assert_eq!(set.mode("svc:1").await, BreakerMode::Closed);

        assert!(set.admit("svc:1", CFG).await);
        set.record_failure("svc:1", CFG).await;
        assert_eq!(set.mode("svc:1").await, BreakerMode::Open);
        assert!(!set.admit("svc:1", CFG).await);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_streak_in_closed() {
        let set = BreakerSet::new();
        set.record_failure("svc:1", CFG).await;
        set.record_failure("svc:1", CFG).await;
        set.record_success("svc:1", CFG).await;
        set.record_failure("svc:1", CFG).await;
        set.record_failure("svc:1", CFG).await;
        assert_eq!(set.mode("svc:1").await, BreakerMode::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cool_down_admits_a_trial_call() {
        let set = BreakerSet::new();
        for _ in 0..3 {
            set.record_failure("svc:1", CFG).await;
        }
        assert!(!set.admit("svc:1", CFG).await);

        advance(CFG.cool_down).await;
        assert!(set.admit("svc:1", CFG).await);
        assert_eq!(set.mode("svc:1").await, BreakerMode::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_closes_after_success_threshold() {
        let set = BreakerSet::new();
        for _ in 0..3 {
            set.record_failure("svc:1", CFG).await;
        }
        advance(CFG.cool_down).await;
        assert!(set.admit("svc:1", CFG).await);

        set.record_success("svc:1", CFG).await;
        assert_eq!(set.mode("svc:1").await, BreakerMode::HalfOpen);
        set.record_success("svc:1", CFG).await;
        assert_eq!(set.mode("svc:1").await, BreakerMode::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_and_restamps() {
        let set = BreakerSet::new();
        for _ in 0..3 {
            set.record_failure("svc:1", CFG).await;
        }
        advance(CFG.cool_down).await;
        assert!(set.admit("svc:1", CFG).await);
        set.record_success("svc:1", CFG).await;
        set.record_failure("svc:1", CFG).await;
        assert_eq!(set.mode("svc:1").await, BreakerMode::Open);

        // The cool-down restarts from the reopening
        advance(CFG.cool_down - Duration::from_secs(1)).await;
        assert!(!set.admit("svc:1", CFG).await);
        advance(Duration::from_secs(1)).await;
        assert!(set.admit("svc:1", CFG).await);
    }

    #[tokio::test(start_paused = true)]
    async fn endpoints_are_independent() {
        let set = BreakerSet::new();
        for _ in 0..3 {
            set.record_failure("svc:1", CFG).await;
        }
        assert!(!set.admit("svc:1", CFG).await);
        assert!(set.admit("svc:2", CFG).await);
    }

    #[tokio::test(start_paused = true)]
    async fn retain_drops_retired_endpoints() {
        let set = BreakerSet::new();
        for _ in 0..3 {
            set.record_failure("svc:1", CFG).await;
        }
        set.record_failure("svc:2", CFG).await;

        let live: HashSet<String> = ["svc:2".to_string()].into();
        set.retain(&live).await;
        // svc:1 state is gone; a fresh breaker starts Closed
        assert_eq!(set.mode("svc:1").await, BreakerMode::Closed);
        assert!(set.admit("svc:1", CFG).await);
    }
}
