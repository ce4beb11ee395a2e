//! Token bucket.
//!
//! A bucket holds up to `max_tokens` tokens and gains `refill_rate` tokens per
//! second. Each admitted request consumes one token, so a client may burst up
//! to the bucket capacity and is then held to the refill rate.

use std::time::{Duration, Instant};

use tracing::warn;

use super::decision::{ceil_millis, RateLimitDecision};

/// Per-key token bucket state.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucketEntry {
    /// Tokens currently available, `0 <= tokens <= max_tokens`
    pub tokens: f64,
    /// Last instant whole tokens were credited
    pub last_refill: Instant,
    /// Bucket capacity
    pub max_tokens: u32,
    /// Tokens added per second
    pub refill_rate: f64,
}

impl TokenBucketEntry {
    /// Create a bucket for the first request on a key. The request consumes
    /// one token immediately.
    pub(crate) fn first(
        now: Instant,
        max_tokens: u32,
        refill_rate: f64,
    ) -> (Self, RateLimitDecision) {
        let entry = Self {
            tokens: f64::from(max_tokens) - 1.0,
            last_refill: now,
            max_tokens,
            refill_rate,
        };
        let decision =
            RateLimitDecision::allow(max_tokens, max_tokens - 1, ceil_millis(1.0 / refill_rate));
        (entry, decision)
    }

    /// Refill from elapsed time, then try to take one token.
    pub(crate) fn check(
        &mut self,
        now: Instant,
        max_tokens: u32,
        refill_rate: f64,
    ) -> RateLimitDecision {
        if self.max_tokens != max_tokens || self.refill_rate != refill_rate {
            warn!(
                max_tokens,
                refill_rate,
                previous_max_tokens = self.max_tokens,
                previous_refill_rate = self.refill_rate,
                "Token bucket parameters changed for an existing key; adopting the new values"
            );
            self.max_tokens = max_tokens;
            self.refill_rate = refill_rate;
            self.tokens = self.tokens.min(f64::from(max_tokens));
        }

        self.refill(now);
        let capacity = f64::from(self.max_tokens);
        debug_assert!(
            (0.0..=capacity).contains(&self.tokens),
            "token count {} outside [0, {}]",
            self.tokens,
            capacity
        );

        if self.tokens < 1.0 {
            // Fraction already accrued since the last credit counts towards
            // the next token.
            let accrued = self.accrued(now);
            let missing = (1.0 - self.tokens - accrued).max(0.0);
            return RateLimitDecision::deny(self.max_tokens, ceil_millis(missing / self.refill_rate));
        }

        self.tokens -= 1.0;
        let until_full = ceil_millis((capacity - self.tokens) / self.refill_rate);
        RateLimitDecision::allow(self.max_tokens, self.tokens.floor() as u32, until_full)
    }

    /// Credit whole tokens earned since `last_refill`, capped at capacity.
    fn refill(&mut self, now: Instant) {
        let to_add = self.accrued(now);
        if to_add >= 1.0 {
            self.tokens = (self.tokens + to_add.floor()).min(f64::from(self.max_tokens));
            self.last_refill = now;
        }
    }

    fn accrued(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.last_refill).as_secs_f64() * self.refill_rate
    }

    /// Whether the bucket would be full at `now` and has seen no refill for
    /// longer than `idle_ttl`. Dropping such an entry loses nothing: a fresh
    /// bucket starts full.
    pub(crate) fn is_expired(&self, now: Instant, idle_ttl: Duration) -> bool {
        let idle = now.saturating_duration_since(self.last_refill);
        let projected = self.tokens + self.accrued(now);
        idle > idle_ttl && projected >= f64::from(self.max_tokens)
    }
}

/// Refill rate used when a token bucket is configured by request count only:
/// sustains the same steady-state throughput as a one-minute window.
pub fn default_refill_rate(max_requests: u32) -> f64 {
    f64::from(max_requests.div_ceil(60))
}
