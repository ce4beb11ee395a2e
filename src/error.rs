//! Error types for the Tollgate engine.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// A request was denied by the address-keyed or wallet-keyed check
    #[error("Rate limit exceeded for {key}: limit {limit}, retry in {}ms", .reset_in.as_millis())]
    RateLimitExceeded {
        /// The key whose limit was hit
        key: String,
        /// The limit that applied to that key
        limit: u32,
        /// Time until the caller may retry
        reset_in: Duration,
    },

    /// Configuration-related errors (caller bugs, not runtime events)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TollgateError {
    /// Whether this error is a rate limit denial.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TollgateError::RateLimitExceeded { .. })
    }

    /// Seconds a client should wait before retrying, rounded up.
    ///
    /// Returns `None` for errors that are not rate limit denials.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            TollgateError::RateLimitExceeded { reset_in, .. } => {
                Some(crate::ratelimit::ceil_secs(*reset_in).max(1))
            }
            _ => None,
        }
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
