//! Rate limiter trait for abstracting the state backend.

use super::decision::RateLimitDecision;
use super::limiter::Limit;
use super::store::StoreStats;

/// Trait for rate limiter implementations.
///
/// [`RateLimiter`](super::RateLimiter) implements this over the in-process
/// [`Store`](super::Store). Deployments that need one consistent view across
/// several processes implement it over a shared store offering atomic
/// increment-and-get with expiry; [`RateLimitGuard`](super::RateLimitGuard)
/// works with either.
pub trait RateLimitBackend: Send + Sync {
    /// Count one request for `key` against `limit`.
    fn check(&self, key: &str, limit: &Limit) -> RateLimitDecision;

    /// Entry counts for operational monitoring.
    fn stats(&self) -> StoreStats;
}
