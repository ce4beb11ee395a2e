//! End-to-end behaviour of the throttling engine, driven by a mock clock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tollgate::config::StoreConfig;
use tollgate::error::TollgateError;
use tollgate::ratelimit::{
    CheckOptions, Limit, MockClock, Policy, RateLimitGuard, RateLimitHeaders, RateLimiter,
    RequestIdentity, Store,
};

const MINUTE: Duration = Duration::from_secs(60);

fn limiter() -> (RateLimiter<MockClock>, MockClock) {
    limiter_with(StoreConfig::default())
}

fn limiter_with(config: StoreConfig) -> (RateLimiter<MockClock>, MockClock) {
    let clock = MockClock::new(Instant::now());
    let limiter = RateLimiter::with_clock(Store::with_config(config).unwrap(), clock.clone());
    (limiter, clock)
}

#[test]
fn test_sliding_window_example_scenario() {
    let (limiter, clock) = limiter();

    let mut remaining = Vec::new();
    for _ in 0..3 {
        let decision = limiter
            .check_rate_limit("ip:1.2.3.4", 3, MINUTE, CheckOptions::default())
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.limit, 3);
        remaining.push(decision.remaining);
        clock.advance(Duration::from_secs(5));
    }
    assert_eq!(remaining, vec![2, 1, 0]);

    let denied = limiter
        .check_rate_limit("ip:1.2.3.4", 3, MINUTE, CheckOptions::default())
        .unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert!(denied.reset_in <= MINUTE);
    assert_eq!(denied.reset_in, Duration::from_secs(45));
}

#[test]
fn test_token_bucket_example_scenario() {
    let (limiter, _clock) = limiter();
    let options = CheckOptions::token_bucket(1.0);

    let remaining: Vec<u32> = (0..5)
        .map(|_| {
            let decision = limiter
                .check_rate_limit("read:ip:5.6.7.8", 5, MINUTE, options)
                .unwrap();
            assert!(decision.allowed);
            decision.remaining
        })
        .collect();
    assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

    let denied = limiter
        .check_rate_limit("read:ip:5.6.7.8", 5, MINUTE, options)
        .unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.reset_in, Duration::from_millis(1_000));
}

#[test]
fn test_no_burst_doubling_at_window_boundary() {
    const N: u32 = 5;
    let (limiter, clock) = limiter();
    let limit = Limit::sliding_window(N, MINUTE).unwrap();

    // Establish a window long ago so the next window boundary is known.
    assert!(limiter.check("burst", &limit).allowed);
    clock.advance(MINUTE * 2 - Duration::from_millis(1));

    let mut admitted = 0;
    for _ in 0..N {
        if limiter.check("burst", &limit).allowed {
            admitted += 1;
        }
    }
    assert_eq!(admitted, N, "the full quota is available before the boundary");

    clock.advance(Duration::from_millis(1));
    for _ in 0..N {
        assert!(
            !limiter.check("burst", &limit).allowed,
            "requests right after the boundary must not double the quota"
        );
    }
}

#[test]
fn test_previous_window_decays_over_the_next() {
    const N: u32 = 4;
    let (limiter, clock) = limiter();
    let limit = Limit::sliding_window(N, MINUTE).unwrap();

    for _ in 0..N {
        assert!(limiter.check("decay", &limit).allowed);
    }
    clock.advance(MINUTE);
    assert!(!limiter.check("decay", &limit).allowed);

    // A quarter into the next window one slot has decayed away.
    clock.advance(Duration::from_secs(15));
    assert!(limiter.check("decay", &limit).allowed);
    assert!(!limiter.check("decay", &limit).allowed);
}

#[test]
fn test_monotonic_decrement() {
    const N: u32 = 10;
    let (limiter, clock) = limiter();
    let limit = Limit::sliding_window(N, MINUTE).unwrap();

    let mut previous = None;
    for _ in 0..N {
        let decision = limiter.check("mono", &limit);
        assert!(decision.allowed);
        if let Some(prev) = previous {
            assert_eq!(decision.remaining, prev - 1);
        }
        previous = Some(decision.remaining);
        clock.advance(Duration::from_secs(2));
    }
    assert_eq!(previous, Some(0));
    assert!(!limiter.check("mono", &limit).allowed);
}

#[test]
fn test_token_bucket_burst_bound_and_refill() {
    const M: u32 = 8;
    let (limiter, clock) = limiter();
    let limit = Limit::token_bucket(M, 4.0).unwrap();

    for _ in 0..M {
        assert!(limiter.check("bucket", &limit).allowed);
    }
    assert!(!limiter.check("bucket", &limit).allowed);

    // 1 / refill_rate seconds later exactly one more token is available.
    clock.advance(Duration::from_millis(250));
    assert!(limiter.check("bucket", &limit).allowed);
    assert!(!limiter.check("bucket", &limit).allowed);
}

#[test]
fn test_refill_never_exceeds_capacity() {
    const M: u32 = 6;
    let (limiter, clock) = limiter();
    let limit = Limit::token_bucket(M, 100.0).unwrap();

    assert!(limiter.check("cap", &limit).allowed);
    clock.advance(Duration::from_secs(86_400));

    for _ in 0..M {
        assert!(limiter.check("cap", &limit).allowed);
        let entry = limiter.store().bucket_entry("cap").unwrap();
        assert!(entry.tokens <= f64::from(M));
    }
    assert!(!limiter.check("cap", &limit).allowed);
}

#[test]
fn test_strict_wallet_defeats_address_rotation() {
    const N: u32 = 6;
    let clock = MockClock::new(Instant::now());
    let backend = Arc::new(RateLimiter::with_clock(Store::new(), clock));
    let guard = RateLimitGuard::new(Arc::clone(&backend));
    let policy = Policy::new("order", Limit::sliding_window(N, MINUTE).unwrap()).strict();

    let half = N / 2;
    let mut outcomes = Vec::new();
    for i in 0..=half {
        let identity = RequestIdentity::new()
            .with_header("x-forwarded-for", format!("198.51.100.{}", i + 1))
            .with_wallet("0xFeedBeef");
        outcomes.push(guard.apply(&identity, &policy));
    }

    assert!(outcomes[..half as usize].iter().all(|o| o.is_ok()));
    match outcomes.last() {
        Some(Err(TollgateError::RateLimitExceeded { key, .. })) => {
            assert_eq!(key, "order:wallet:0xfeedbeef");
        }
        other => panic!("expected the wallet check to deny, got {:?}", other),
    }

    // Every address stayed well under its own limit.
    for i in 0..=half {
        let entry = backend
            .store()
            .window_entry(&format!("order:ip:198.51.100.{}", i + 1))
            .unwrap();
        assert_eq!(entry.curr_count, 1);
    }
}

#[test]
fn test_eviction_bounds_map_size() {
    const CEILING: usize = 200;
    let (limiter, _clock) = limiter_with(StoreConfig {
        cleanup_interval: 500,
        max_entries: CEILING,
        bucket_idle_ttl_secs: 600,
    });
    let window = Limit::sliding_window(5, MINUTE).unwrap();
    let bucket = Limit::token_bucket(5, 1.0).unwrap();

    for i in 0..5_000 {
        let key = format!("spoof:ip:10.{}.{}.{}", i / 65_536, (i / 256) % 256, i % 256);
        limiter.check(&key, &window);
        limiter.check(&key, &bucket);

        let stats = limiter.stats();
        assert!(stats.sliding_window_entries <= CEILING + 1);
        assert!(stats.token_bucket_entries <= CEILING + 1);
    }

    // The most recent key survives eviction.
    assert!(limiter.store().window_entry("spoof:ip:10.0.19.135").is_some());
}

#[test]
fn test_lazy_cleanup_without_background_timer() {
    let (limiter, clock) = limiter_with(StoreConfig {
        cleanup_interval: 10,
        max_entries: 10_000,
        bucket_idle_ttl_secs: 600,
    });
    let limit = Limit::sliding_window(5, MINUTE).unwrap();

    for i in 0..5 {
        limiter.check(&format!("old-{i}"), &limit);
    }
    assert_eq!(limiter.stats().sliding_window_entries, 5);

    // Nothing is removed by time passing alone.
    clock.advance(MINUTE * 10);
    assert_eq!(limiter.stats().sliding_window_entries, 5);

    for _ in 0..5 {
        limiter.check("active", &limit);
    }
    assert_eq!(limiter.stats().sliding_window_entries, 1);
}

#[test]
fn test_headers_follow_decision() {
    let (limiter, _clock) = limiter();
    let limit = Limit::sliding_window(1, MINUTE).unwrap();
    let now = chrono::Utc::now();

    let allowed = limiter.check("hdr", &limit);
    let headers = RateLimitHeaders::from_decision(&allowed, now);
    assert_eq!(headers.limit, 1);
    assert_eq!(headers.remaining, 0);
    assert!(headers.retry_after.is_none());
    assert!(headers.reset >= now.timestamp() + 60);

    let denied = limiter.check("hdr", &limit);
    let headers = RateLimitHeaders::from_decision(&denied, now);
    assert_eq!(headers.retry_after, Some(60));
    assert_eq!(headers.to_pairs().len(), 4);
}
