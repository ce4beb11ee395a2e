//! Sliding window counter.
//!
//! Each key keeps the count of the previous fixed window and of the current
//! one. Admission is decided on the weighted sum
//!
//! ```text
//! effective = prev_count * (1 - elapsed / window) + curr_count
//! ```
//!
//! so the previous window's contribution decays linearly as the current one
//! progresses. A burst straddling a window boundary is therefore capped at
//! `max_requests` rather than twice that, as it would be with naive fixed
//! windows.

use std::time::{Duration, Instant};

use tracing::warn;

use super::decision::RateLimitDecision;

/// Per-key sliding window state.
#[derive(Debug, Clone, PartialEq)]
pub struct SlidingWindowEntry {
    /// Requests counted in the window preceding the current one
    pub prev_count: u32,
    /// Requests counted in the current window
    pub curr_count: u32,
    /// Start of the current window
    pub window_start: Instant,
    /// Window length this entry was created with
    pub window: Duration,
}

impl SlidingWindowEntry {
    /// Create the entry for the first request seen on a key.
    ///
    /// The creating request is counted and admitted.
    pub(crate) fn first(
        now: Instant,
        max_requests: u32,
        window: Duration,
    ) -> (Self, RateLimitDecision) {
        let entry = Self {
            prev_count: 0,
            curr_count: 1,
            window_start: now,
            window,
        };
        let decision = RateLimitDecision::allow(max_requests, max_requests - 1, window);
        (entry, decision)
    }

    /// Count one request against this entry.
    pub(crate) fn check(
        &mut self,
        now: Instant,
        max_requests: u32,
        window: Duration,
    ) -> RateLimitDecision {
        if self.window != window {
            warn!(
                configured = ?self.window,
                requested = ?window,
                "Sliding window length changed for an existing key; adopting the new length"
            );
            self.window = window;
        }

        let mut elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= window {
            let windows_passed = elapsed.as_nanos() / window.as_nanos();
            if windows_passed == 1 {
                self.prev_count = self.curr_count;
                self.curr_count = 0;
                self.window_start += window;
                elapsed -= window;
            } else {
                // Idle for longer than two windows: history is stale.
                self.prev_count = 0;
                self.curr_count = 0;
                self.window_start = now;
                elapsed = Duration::ZERO;
            }
        }

        let effective = self.effective_count(elapsed);
        let reset_in = window - elapsed;
        let limit = f64::from(max_requests);

        if effective >= limit {
            return RateLimitDecision::deny(max_requests, reset_in);
        }

        self.curr_count = self.curr_count.saturating_add(1);
        let remaining = (limit - effective - 1.0).floor().max(0.0) as u32;
        RateLimitDecision::allow(max_requests, remaining, reset_in)
    }

    /// Weighted request count at `elapsed` into the current window.
    pub fn effective_count(&self, elapsed: Duration) -> f64 {
        let ratio = (elapsed.as_secs_f64() / self.window.as_secs_f64()).min(1.0);
        let effective = f64::from(self.prev_count) * (1.0 - ratio) + f64::from(self.curr_count);
        debug_assert!(effective >= 0.0, "effective count went negative: {effective}");
        effective
    }

    /// Whether both the previous and the current window lie fully in the past.
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.window_start + self.window * 2 < now
    }
}
