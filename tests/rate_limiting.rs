use ratchet::config::RateLimitConfig;
use ratchet::limits::{RateLimiter, TokenBucket};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[test]
fn burst_then_refill_admission() {
    // Capacity 5, rate 10/s: five immediate admits, the sixth denied,
    // one more admitted after ~100ms.
    let bucket = TokenBucket::with_limits(5.0, 10.0);
    for i in 0..5 {
        assert!(bucket.allow(1.0), "admit {} of the burst", i);
    }
    assert!(!bucket.allow(1.0), "burst exhausted");
    std::thread::sleep(Duration::from_millis(120));
    assert!(bucket.allow(1.0), "one token refilled after 100ms");
}

#[tokio::test]
async fn limiter_scopes_compose() {
    let mut config = RateLimitConfig::default();
    config.global.capacity = 100.0;
    config.global.refill_rate = 0.0;
    config.per_user.capacity = 2.0;
    config.per_user.refill_rate = 0.0;
    let limiter = RateLimiter::new(config);

    // Alice exhausts her bucket; Bob is unaffected; the global pool keeps
    // the charges Alice burned on denied attempts.
    limiter.allow_user("alice", 1.0).unwrap();
    limiter.allow_user("alice", 1.0).unwrap();
    assert!(limiter.allow_user("alice", 1.0).is_err());
    limiter.allow_user("bob", 1.0).unwrap();

    let stats = limiter.stats();
    assert_eq!(stats.global_allowed, 4);
    assert_eq!(stats.user_allowed, 3);
    assert_eq!(stats.user_denied, 1);
    assert_eq!(stats.active_user_buckets, 2);
}

#[tokio::test]
async fn wait_user_recovers_after_refill() {
    let mut config = RateLimitConfig::default();
    config.per_user.capacity = 1.0;
    config.per_user.refill_rate = 20.0;
    let limiter = RateLimiter::new(config);
    limiter.allow_user("alice", 1.0).unwrap();

    let cancel = CancellationToken::new();
    tokio::time::timeout(
        Duration::from_secs(1),
        limiter.wait_user(&cancel, "alice", 1.0),
    )
    .await
    .expect("wait_user stalled past the refill window")
    .unwrap();
}

#[tokio::test]
async fn janitor_lifecycle_is_idempotent() {
    let limiter = RateLimiter::new(RateLimitConfig::default());
    limiter.start();
    limiter.allow_user("alice", 1.0).unwrap();
    limiter.close().await;
    limiter.close().await;
}
