use crate::errors::{RatchetError, RatchetResult};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Fixed-point scale: one token is 1_000_000 micro-tokens.
const MICRO: f64 = 1_000_000.0;

/// Longest single sleep inside `wait` so cancellation is observed promptly
/// and the token count is re-checked against concurrent consumers.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Lock-free token bucket with continuous refill.
///
/// `tokens` and `last_refill` are fixed-point atomics (micro-tokens /
/// microseconds since `origin`) updated by compare-and-swap loops: concurrent
/// `allow` calls never over-consume, and at most one refill succeeds per
/// observed monotonic tick. Capacity and refill rate sit behind a read/write
/// lock and are only written by `update_config`.
pub struct TokenBucket {
    /// Monotonic base for the `last_refill` offset.
    origin: Instant,
    /// Current tokens, in micro-tokens.
    micro_tokens: AtomicU64,
    /// Microseconds since `origin` of the last successful refill.
    last_refill: AtomicU64,
    config: RwLock<BucketLimits>,
}

#[derive(Debug, Clone, Copy)]
struct BucketLimits {
    capacity: f64,
    refill_rate: f64,
}

impl TokenBucket {
    /// Bucket with the package defaults: capacity 100, refill 10 tokens/s.
    pub fn new() -> Self {
        Self::with_limits(100.0, 10.0)
    }

    pub fn with_limits(capacity: f64, refill_rate: f64) -> Self {
        let capacity = capacity.max(0.0);
        Self {
            origin: Instant::now(),
            micro_tokens: AtomicU64::new((capacity * MICRO) as u64),
            last_refill: AtomicU64::new(0),
            config: RwLock::new(BucketLimits {
                capacity,
                refill_rate: refill_rate.max(0.0),
            }),
        }
    }

    fn limits(&self) -> BucketLimits {
        match self.config.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn!("token bucket config lock poisoned — using last written value");
                *poisoned.into_inner()
            }
        }
    }

    /// Credit elapsed time. Only the caller that wins the `last_refill` CAS
    /// adds tokens, so a burst of concurrent operations refills once per
    /// observed tick.
    fn refill(&self) {
        let limits = self.limits();
        let now = self.origin.elapsed().as_micros() as u64;
        let last = self.last_refill.load(Ordering::Acquire);
        if now <= last {
            return;
        }
        if self
            .last_refill
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Another caller refilled for this tick.
            return;
        }
        let delta = ((now - last) as f64 * limits.refill_rate) as u64;
        if delta == 0 {
            return;
        }
        let cap = (limits.capacity * MICRO) as u64;
        let _ = self
            .micro_tokens
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |tokens| {
                Some(tokens.saturating_add(delta).min(cap))
            });
    }

    /// Consume `n` tokens if available. Atomic admit/deny.
    pub fn allow(&self, n: f64) -> bool {
        self.refill();
        let need = (n.max(0.0) * MICRO) as u64;
        self.micro_tokens
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |tokens| {
                if tokens >= need {
                    Some(tokens - need)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// How long until `n` tokens could be consumed, without blocking.
    /// Zero when they are available now.
    pub fn reserve(&self, n: f64) -> Duration {
        self.refill();
        let limits = self.limits();
        let need = (n.max(0.0) * MICRO) as u64;
        let have = self.micro_tokens.load(Ordering::Acquire);
        if have >= need {
            return Duration::ZERO;
        }
        if limits.refill_rate <= 0.0 {
            return Duration::MAX;
        }
        let deficit = (need - have) as f64 / MICRO;
        Duration::from_secs_f64(deficit / limits.refill_rate)
    }

    /// Block until `n` tokens are consumed or `cancel` fires.
    ///
    /// An explicit loop rather than recursion: sleep for at most one slice of
    /// the reserve hint, then re-check against the actual current count. The
    /// loop exits within one slice of cancellation.
    pub async fn wait(&self, cancel: &CancellationToken, n: f64) -> RatchetResult<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(RatchetError::Cancelled);
            }
            if self.allow(n) {
                return Ok(());
            }
            let hint = self.reserve(n);
            if hint == Duration::MAX {
                // Zero refill rate: the tokens will never arrive.
                cancel.cancelled().await;
                return Err(RatchetError::Cancelled);
            }
            let sleep_for = hint.clamp(Duration::from_millis(1), WAIT_SLICE);
            tokio::select! {
                () = cancel.cancelled() => return Err(RatchetError::Cancelled),
                () = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    /// Replace capacity and refill rate. Shrinking the capacity clamps the
    /// current token count down to the new ceiling.
    pub fn update_config(&self, capacity: f64, refill_rate: f64) {
        let capacity = capacity.max(0.0);
        match self.config.write() {
            Ok(mut guard) => {
                guard.capacity = capacity;
                guard.refill_rate = refill_rate.max(0.0);
            }
            Err(_) => {
                warn!("token bucket config lock poisoned — config update dropped");
                return;
            }
        }
        let cap = (capacity * MICRO) as u64;
        let _ = self
            .micro_tokens
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |tokens| {
                Some(tokens.min(cap))
            });
    }

    /// Currently available tokens (fractional).
    pub fn available(&self) -> f64 {
        self.refill();
        self.micro_tokens.load(Ordering::Acquire) as f64 / MICRO
    }

    pub fn capacity(&self) -> f64 {
        self.limits().capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.limits().refill_rate
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
