//! Rate limiting logic and state management.

mod backend;
mod clock;
mod decision;
mod guard;
mod key;
mod limiter;
mod policy;
mod sliding_window;
mod store;
mod token_bucket;

pub use backend::RateLimitBackend;
pub use clock::{Clock, MockClock, SystemClock};
pub use decision::{
    RateLimitDecision, RateLimitHeaders, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET,
    HEADER_RETRY_AFTER,
};
pub use guard::RateLimitGuard;
pub use key::{build_key, build_wallet_key, RequestIdentity, ADDRESS_HEADERS, UNKNOWN_ADDRESS};
pub use limiter::{Algorithm, CheckOptions, Limit, RateLimiter};
pub use policy::{PoliciesFile, Policy, PolicyConfig, PolicyRegistry, DEFAULT_WINDOW_MS};
pub use sliding_window::SlidingWindowEntry;
pub use store::{Store, StoreStats};
pub use token_bucket::{default_refill_rate, TokenBucketEntry};

pub(crate) use decision::ceil_secs;
