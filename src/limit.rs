//! Global rate limiter for mutating Bot API calls.
//!
//! One limiter instance is shared by every worker of a bulk run and by
//! single-item handlers, making it the sole source of truth for aggregate
//! throughput no matter how many tasks are in flight.

use crate::config::LIMITER_RECHECK_MS;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Sliding-window rate limiter: at most `per_second` admissions within any
/// trailing one-second window.
///
/// Admission order across waiting tasks is not FIFO, only rate-bounded.
pub struct RateLimiter {
    per_second: usize,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter admitting up to `per_second` operations per second.
    ///
    /// A ceiling of zero is clamped to one so `admit` always terminates.
    #[must_use]
    pub fn new(per_second: usize) -> Self {
        Self {
            per_second: per_second.max(1),
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Suspends the caller until one more operation fits under the ceiling.
    ///
    /// Saturation is handled by sleeping a short quantum and re-checking
    /// rather than sleeping out the full window, which keeps worst-case
    /// overshoot small and the limiter responsive to bursts.
    pub async fn admit(&self) {
        loop {
            if self.try_admit() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(LIMITER_RECHECK_MS)).await;
        }
    }

    /// One prune-and-check step. Never suspends; the lock is held only for
    /// the duration of the check so competing tasks cannot interleave inside
    /// it.
    fn try_admit(&self) -> bool {
        let now = Instant::now();
        let mut window = self
            .window
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= Duration::from_secs(1) {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < self.per_second {
            window.push_back(now);
            true
        } else {
            false
        }
    }

    /// Configured ceiling
    #[must_use]
    pub const fn per_second(&self) -> usize {
        self.per_second
    }
}
