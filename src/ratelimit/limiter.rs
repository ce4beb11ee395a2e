//! Core rate limiter implementation.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::backend::RateLimitBackend;
use super::clock::{Clock, SystemClock};
use super::decision::RateLimitDecision;
use super::sliding_window::SlidingWindowEntry;
use super::store::{Store, StoreStats};
use super::token_bucket::{default_refill_rate, TokenBucketEntry};
use crate::config::StoreConfig;
use crate::error::{Result, TollgateError};

/// Counting algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// Weighted two-window counter, for write and financial endpoints
    #[default]
    SlidingWindow,
    /// Refilling bucket, for burst-tolerant reads
    TokenBucket,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::SlidingWindow => f.write_str("sliding-window"),
            Algorithm::TokenBucket => f.write_str("token-bucket"),
        }
    }
}

/// A validated limit. Only the checked constructors build one, so every
/// `Limit` has a positive capacity and a positive window or refill rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limit(LimitKind);

#[derive(Debug, Clone, Copy, PartialEq)]
enum LimitKind {
    SlidingWindow { max_requests: u32, window: Duration },
    TokenBucket { max_tokens: u32, refill_rate: f64 },
}

impl Limit {
    /// At most `max_requests` per rolling `window`.
    pub fn sliding_window(max_requests: u32, window: Duration) -> Result<Self> {
        if max_requests == 0 {
            return Err(TollgateError::Config(
                "max_requests must be greater than zero".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(TollgateError::Config(
                "window must be greater than zero".to_string(),
            ));
        }
        Ok(Self(LimitKind::SlidingWindow {
            max_requests,
            window,
        }))
    }

    /// Bursts of up to `max_tokens`, refilled at `refill_rate` tokens/second.
    pub fn token_bucket(max_tokens: u32, refill_rate: f64) -> Result<Self> {
        if max_tokens == 0 {
            return Err(TollgateError::Config(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        if !(refill_rate.is_finite() && refill_rate > 0.0) {
            return Err(TollgateError::Config(format!(
                "refill_rate must be a positive number, got {}",
                refill_rate
            )));
        }
        Ok(Self(LimitKind::TokenBucket {
            max_tokens,
            refill_rate,
        }))
    }

    pub fn algorithm(&self) -> Algorithm {
        match self.0 {
            LimitKind::SlidingWindow { .. } => Algorithm::SlidingWindow,
            LimitKind::TokenBucket { .. } => Algorithm::TokenBucket,
        }
    }

    /// Max requests per window, or bucket capacity.
    pub fn capacity(&self) -> u32 {
        match self.0 {
            LimitKind::SlidingWindow { max_requests, .. } => max_requests,
            LimitKind::TokenBucket { max_tokens, .. } => max_tokens,
        }
    }

    /// Window length, for sliding window limits.
    pub fn window(&self) -> Option<Duration> {
        match self.0 {
            LimitKind::SlidingWindow { window, .. } => Some(window),
            LimitKind::TokenBucket { .. } => None,
        }
    }

    /// Tokens per second, for token bucket limits.
    pub fn refill_rate(&self) -> Option<f64> {
        match self.0 {
            LimitKind::SlidingWindow { .. } => None,
            LimitKind::TokenBucket { refill_rate, .. } => Some(refill_rate),
        }
    }

    /// The same limit with half the capacity, floored, never below one.
    pub fn halved(&self) -> Self {
        let half = (self.capacity() / 2).max(1);
        match self.0 {
            LimitKind::SlidingWindow { window, .. } => Self(LimitKind::SlidingWindow {
                max_requests: half,
                window,
            }),
            LimitKind::TokenBucket { refill_rate, .. } => Self(LimitKind::TokenBucket {
                max_tokens: half,
                refill_rate,
            }),
        }
    }
}

/// Options for [`RateLimiter::check_rate_limit`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CheckOptions {
    /// Counting algorithm
    pub algorithm: Algorithm,
    /// Token bucket refill rate; defaults to `ceil(max_requests / 60)`
    pub refill_rate: Option<f64>,
}

impl CheckOptions {
    /// Token bucket with an explicit refill rate.
    pub fn token_bucket(refill_rate: f64) -> Self {
        Self {
            algorithm: Algorithm::TokenBucket,
            refill_rate: Some(refill_rate),
        }
    }
}

/// The rate limiting engine: an owned [`Store`] plus a [`Clock`].
///
/// This struct is thread-safe and can be shared across threads behind an
/// `Arc`. Each instance has its own store, so tests can run in isolation.
pub struct RateLimiter<C: Clock = SystemClock> {
    store: Store,
    clock: C,
}

impl RateLimiter<SystemClock> {
    /// Create a new rate limiter with default settings.
    pub fn new() -> Self {
        Self::with_clock(Store::new(), SystemClock)
    }

    /// Create a new rate limiter with the given store settings, rejecting
    /// settings that [`StoreConfig::validate`] refuses.
    pub fn with_config(config: StoreConfig) -> Result<Self> {
        Ok(Self::with_clock(Store::with_config(config)?, SystemClock))
    }
}

impl Default for RateLimiter<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a rate limiter over an explicit store and clock.
    pub fn with_clock(store: Store, clock: C) -> Self {
        Self { store, clock }
    }

    /// Count one request for `key` against `limit`.
    pub fn check(&self, key: &str, limit: &Limit) -> RateLimitDecision {
        let now = self.clock.now();

        trace!(key = %key, algorithm = %limit.algorithm(), "Checking rate limit");

        let decision = match limit.0 {
            LimitKind::SlidingWindow {
                max_requests,
                window,
            } => self.store.update_window(
                key,
                now,
                || {
                    debug!(
                        key = %key,
                        max_requests,
                        window_ms = window.as_millis() as u64,
                        "Creating sliding window entry"
                    );
                    SlidingWindowEntry::first(now, max_requests, window)
                },
                |entry| entry.check(now, max_requests, window),
            ),
            LimitKind::TokenBucket {
                max_tokens,
                refill_rate,
            } => self.store.update_bucket(
                key,
                now,
                || {
                    debug!(key = %key, max_tokens, refill_rate, "Creating token bucket entry");
                    TokenBucketEntry::first(now, max_tokens, refill_rate)
                },
                |entry| entry.check(now, max_tokens, refill_rate),
            ),
        };

        if !decision.allowed {
            debug!(
                key = %key,
                limit = decision.limit,
                reset_in_ms = decision.reset_in_ms(),
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Check `key` against `max_requests` per `window`, or, with the token
    /// bucket algorithm, against a bucket of `max_requests` tokens.
    ///
    /// Denials are reported in the decision; only invalid arguments are
    /// errors.
    pub fn check_rate_limit(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
        options: CheckOptions,
    ) -> Result<RateLimitDecision> {
        let limit = match options.algorithm {
            Algorithm::SlidingWindow => Limit::sliding_window(max_requests, window)?,
            Algorithm::TokenBucket => {
                let refill_rate = options
                    .refill_rate
                    .unwrap_or_else(|| default_refill_rate(max_requests));
                Limit::token_bucket(max_requests, refill_rate)?
            }
        };
        Ok(self.check(key, &limit))
    }

    /// Current entry counts.
    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// The underlying store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Clear all limiter state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.store.clear();
    }
}

impl<C: Clock> RateLimitBackend for RateLimiter<C> {
    fn check(&self, key: &str, limit: &Limit) -> RateLimitDecision {
        RateLimiter::check(self, key, limit)
    }

    fn stats(&self) -> StoreStats {
        RateLimiter::stats(self)
    }
}
