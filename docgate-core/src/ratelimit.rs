//! Sliding-window rate limiting for outbound upstream calls
//!
//! The upstream publishes a hard policy of 5 downloads per 10 seconds per
//! credential. The window is global to the proxy process: one logical
//! counter shared by every resolution, never per-thread or per-client.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Outcome of an admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request admitted; `remaining` slots left in the current window
    Allowed { remaining: usize },
    /// Request denied; retry once `retry_after` has elapsed
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// Global sliding-window limiter
///
/// Keeps an ordered queue of admission timestamps; entries older than the
/// window are pruned lazily on each attempt.
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    admissions: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    /// Limiter pinned to the upstream's published policy
    pub fn upstream_policy() -> Self {
        Self::new(
            crate::RATE_LIMIT_MAX_REQUESTS,
            Duration::from_secs(crate::RATE_LIMIT_WINDOW_SECS),
        )
    }

    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            admissions: Mutex::new(VecDeque::with_capacity(max_requests + 1)),
        }
    }

    /// Attempt to admit one request now
    pub fn admit(&self) -> Admission {
        self.admit_at(Instant::now())
    }

    fn admit_at(&self, now: Instant) -> Admission {
        let mut admissions = self.admissions.lock();

        while let Some(oldest) = admissions.front() {
            if now.duration_since(*oldest) >= self.window {
                admissions.pop_front();
            } else {
                break;
            }
        }

        if admissions.len() < self.max_requests {
            admissions.push_back(now);
            Admission::Allowed {
                remaining: self.max_requests - admissions.len(),
            }
        } else {
            // Oldest entry determines when a slot frees up
            let oldest = *admissions.front().expect("non-empty at capacity");
            let retry_after = self.window.saturating_sub(now.duration_since(oldest));
            Admission::Denied { retry_after }
        }
    }

    /// Slots currently available without admitting
    pub fn remaining(&self) -> usize {
        let now = Instant::now();
        let admissions = self.admissions.lock();
        let in_window = admissions
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count();
        self.max_requests.saturating_sub(in_window)
    }

    /// Time until the window fully resets (zero when idle)
    pub fn reset_in(&self) -> Duration {
        let now = Instant::now();
        let admissions = self.admissions.lock();
        admissions
            .back()
            .map(|newest| self.window.saturating_sub(now.duration_since(*newest)))
            .unwrap_or(Duration::ZERO)
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
