use super::*;
use std::sync::Arc;

#[test]
fn starts_full() {
    let bucket = TokenBucket::with_limits(5.0, 10.0);
    assert!((bucket.available() - 5.0).abs() < 0.01);
}

#[test]
fn allow_consumes_until_empty() {
    let bucket = TokenBucket::with_limits(5.0, 0.0);
    for _ in 0..5 {
        assert!(bucket.allow(1.0));
    }
    assert!(!bucket.allow(1.0));
}

#[test]
fn refill_restores_tokens() {
    let bucket = TokenBucket::with_limits(5.0, 10.0);
    while bucket.allow(1.0) {}
    std::thread::sleep(Duration::from_millis(150));
    // ~1.5 tokens refilled after 150ms at 10/s
    assert!(bucket.allow(1.0));
}

#[test]
fn refill_clamps_to_capacity() {
    let bucket = TokenBucket::with_limits(2.0, 1_000.0);
    std::thread::sleep(Duration::from_millis(50));
    assert!(bucket.available() <= 2.0 + f64::EPSILON);
}

#[test]
fn reserve_zero_when_available() {
    let bucket = TokenBucket::with_limits(5.0, 10.0);
    assert_eq!(bucket.reserve(1.0), Duration::ZERO);
}

#[test]
fn reserve_estimates_wait() {
    let bucket = TokenBucket::with_limits(1.0, 10.0);
    assert!(bucket.allow(1.0));
    let hint = bucket.reserve(1.0);
    assert!(hint > Duration::ZERO);
    assert!(hint <= Duration::from_millis(150), "hint was {:?}", hint);
}

#[test]
fn shrinking_capacity_clamps_tokens() {
    let bucket = TokenBucket::with_limits(100.0, 10.0);
    bucket.update_config(3.0, 10.0);
    assert!(bucket.available() <= 3.0 + f64::EPSILON);
    assert_eq!(bucket.capacity(), 3.0);
}

#[test]
fn concurrent_allow_never_over_consumes() {
    let bucket = Arc::new(TokenBucket::with_limits(50.0, 0.0));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let bucket = bucket.clone();
        handles.push(std::thread::spawn(move || {
            let mut admitted = 0u32;
            for _ in 0..100 {
                if bucket.allow(1.0) {
                    admitted += 1;
                }
            }
            admitted
        }));
    }
    let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, 50, "admitted {} of a 50-token budget", total);
}

#[tokio::test]
async fn wait_returns_when_tokens_arrive() {
    let bucket = TokenBucket::with_limits(1.0, 20.0);
    assert!(bucket.allow(1.0));
    let cancel = CancellationToken::new();
    let started = Instant::now();
    bucket.wait(&cancel, 1.0).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn wait_observes_cancellation() {
    let bucket = TokenBucket::with_limits(1.0, 0.0);
    assert!(bucket.allow(1.0));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = bucket.wait(&cancel, 1.0).await.unwrap_err();
    assert!(matches!(err, RatchetError::Cancelled));
}

#[tokio::test]
async fn wait_unblocks_promptly_after_cancel() {
    let bucket = Arc::new(TokenBucket::with_limits(1.0, 0.01));
    assert!(bucket.allow(1.0));
    let cancel = CancellationToken::new();
    let waiter = {
        let bucket = bucket.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { bucket.wait(&cancel, 1.0).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_millis(300), waiter)
        .await
        .expect("wait did not unblock after cancellation")
        .unwrap();
    assert!(matches!(result, Err(RatchetError::Cancelled)));
}

/// Admission over a window is bounded by capacity plus refill.
#[test]
fn window_admission_bound() {
    let bucket = TokenBucket::with_limits(10.0, 100.0);
    let window = Duration::from_millis(200);
    let started = Instant::now();
    let mut admitted = 0u64;
    while started.elapsed() < window {
        if bucket.allow(1.0) {
            admitted += 1;
        }
    }
    let elapsed = started.elapsed().as_secs_f64();
    let bound = (10.0 + 100.0 * elapsed).ceil() as u64;
    assert!(admitted <= bound, "admitted {} > bound {}", admitted, bound);
}
