//! Rate limit decisions and the response header contract derived from them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Outcome of a single rate limit check.
///
/// Decisions are transient: they are computed from the stored entry and
/// never stored themselves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Requests (or whole tokens) left after this one
    pub remaining: u32,
    /// Time until the window resets or the next token arrives
    pub reset_in: Duration,
    /// The configured limit (max requests or bucket capacity)
    pub limit: u32,
}

impl RateLimitDecision {
    pub(crate) fn allow(limit: u32, remaining: u32, reset_in: Duration) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_in,
            limit,
        }
    }

    pub(crate) fn deny(limit: u32, reset_in: Duration) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_in,
            limit,
        }
    }

    /// `reset_in` in whole milliseconds.
    pub fn reset_in_ms(&self) -> u64 {
        self.reset_in.as_millis() as u64
    }

    /// Build the HTTP header values for this decision, relative to now.
    pub fn headers(&self) -> RateLimitHeaders {
        RateLimitHeaders::from_decision(self, Utc::now())
    }
}

/// HTTP response headers describing a rate limit decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitHeaders {
    /// `X-RateLimit-Limit`
    pub limit: u32,
    /// `X-RateLimit-Remaining`
    pub remaining: u32,
    /// `X-RateLimit-Reset`, absolute Unix seconds
    pub reset: i64,
    /// `Retry-After` in seconds; only present on denials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    /// Derive header values from a decision observed at `now`.
    ///
    /// The reset timestamp and `Retry-After` are rounded up so a client that
    /// honours them never retries early.
    pub fn from_decision(decision: &RateLimitDecision, now: DateTime<Utc>) -> Self {
        let reset_at_ms = now.timestamp_millis() + decision.reset_in_ms() as i64;
        let reset = (reset_at_ms + 999).div_euclid(1000);

        let retry_after = if decision.allowed {
            None
        } else {
            Some(ceil_secs(decision.reset_in).max(1))
        };

        Self {
            limit: decision.limit,
            remaining: decision.remaining,
            reset,
            retry_after,
        }
    }

    /// Header name/value pairs ready to be attached to a response.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset.to_string()),
        ];
        if let Some(retry_after) = self.retry_after {
            pairs.push((HEADER_RETRY_AFTER, retry_after.to_string()));
        }
        pairs
    }
}

/// Whole seconds in `duration`, rounded up.
pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Convert fractional seconds to a duration rounded up to the next millisecond.
pub(crate) fn ceil_millis(secs: f64) -> Duration {
    if secs <= 0.0 || !secs.is_finite() {
        return Duration::ZERO;
    }
    Duration::from_millis((secs * 1000.0).ceil() as u64)
}
