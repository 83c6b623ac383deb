//! Circuit breaker guarding the credentialed upstream
//!
//! Protects a shared, rate-limited upstream credential from being hammered
//! during an outage. Three states: Closed passes calls through and counts
//! consecutive failures; Open fails fast until a cool-down elapses; HalfOpen
//! admits exactly one trial call whose outcome decides the next state.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Breaker status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Outcome of asking the breaker whether a call may proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    /// Call may go to the upstream
    Proceed,
    /// Circuit is open; fail fast without touching the upstream
    FastFail { retry_after: Duration },
}

/// Monitoring snapshot of the breaker
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub retry_in_secs: Option<u64>,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker with a single half-open trial
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Breaker tuned to the upstream policy constants
    pub fn upstream_policy() -> Self {
        Self::new(
            crate::BREAKER_FAILURE_THRESHOLD,
            Duration::from_secs(crate::BREAKER_COOLDOWN_SECS),
        )
    }

    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Decide whether a call may proceed, performing the Open -> HalfOpen
    /// transition when the cool-down has elapsed
    pub fn check(&self) -> BreakerDecision {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => BreakerDecision::Proceed,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.cooldown {
                    tracing::info!("circuit breaker transitioning to half-open for trial call");
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    BreakerDecision::Proceed
                } else {
                    BreakerDecision::FastFail {
                        retry_after: self.cooldown - elapsed,
                    }
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    // One trial at a time; everyone else waits out the trial
                    BreakerDecision::FastFail {
                        retry_after: Duration::from_secs(1),
                    }
                } else {
                    inner.trial_in_flight = true;
                    BreakerDecision::Proceed
                }
            }
        }
    }

    /// Record a successful upstream call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                tracing::info!("circuit breaker closing after successful trial");
                Self::close(&mut inner);
            }
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed upstream call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                tracing::warn!("circuit breaker reopening after failed trial");
                Self::open(&mut inner);
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    tracing::error!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opening after consecutive failures"
                    );
                    Self::open(&mut inner);
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Current state for health reporting
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        let retry_in_secs = match inner.state {
            BreakerState::Open => inner
                .opened_at
                .map(|t| self.cooldown.saturating_sub(t.elapsed()).as_secs()),
            _ => None,
        };
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            retry_in_secs,
        }
    }

    /// Manually reset to Closed
    pub fn reset(&self) {
        Self::close(&mut self.inner.lock());
    }

    fn open(inner: &mut BreakerInner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trial_in_flight = false;
    }

    fn close(inner: &mut BreakerInner) {
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }
}
