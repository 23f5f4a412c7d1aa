use crate::config::{BucketConfig, RateLimitConfig};
use crate::errors::{RatchetError, RatchetResult, RateLimitScope};
use crate::limits::bucket::TokenBucket;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A lazily-created per-principal bucket with an idle stamp for the janitor.
struct SubBucket {
    bucket: TokenBucket,
    last_used: Mutex<Instant>,
}

impl SubBucket {
    fn new(limits: &BucketConfig) -> Self {
        Self {
            bucket: TokenBucket::with_limits(limits.capacity, limits.refill_rate),
            last_used: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        if let Ok(mut stamp) = self.last_used.lock() {
            *stamp = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        match self.last_used.lock() {
            Ok(stamp) => stamp.elapsed(),
            Err(_) => Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct Counters {
    global_allowed: AtomicU64,
    global_denied: AtomicU64,
    user_allowed: AtomicU64,
    user_denied: AtomicU64,
    resource_allowed: AtomicU64,
    resource_denied: AtomicU64,
}

/// Point-in-time limiter statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimiterStats {
    pub global_allowed: u64,
    pub global_denied: u64,
    pub user_allowed: u64,
    pub user_denied: u64,
    pub resource_allowed: u64,
    pub resource_denied: u64,
    pub active_user_buckets: usize,
    pub active_resource_buckets: usize,
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// Composes a global token bucket with per-user and per-resource families.
///
/// Admission charges the global bucket first; when the sub-bucket then
/// denies, the global tokens stay consumed. That is the documented behaviour,
/// not an oversight — refunding would let a throttled principal drain the
/// global budget by retrying.
///
/// Sub-buckets are created on first reference and garbage-collected by a
/// background janitor once idle longer than `max_idle_time`.
pub struct RateLimiter {
    global: TokenBucket,
    per_user: BucketConfig,
    per_resource: BucketConfig,
    users: RwLock<HashMap<String, Arc<SubBucket>>>,
    resources: RwLock<HashMap<String, Arc<SubBucket>>>,
    cleanup_interval: Duration,
    max_idle_time: Duration,
    counters: Counters,
    last_cleanup: Mutex<Option<DateTime<Utc>>>,
    janitor: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Arc<Self> {
        Arc::new(Self {
            global: TokenBucket::with_limits(config.global.capacity, config.global.refill_rate),
            per_user: config.per_user.clone(),
            per_resource: config.per_resource.clone(),
            users: RwLock::new(HashMap::new()),
            resources: RwLock::new(HashMap::new()),
            cleanup_interval: config.cleanup_interval(),
            max_idle_time: config.max_idle_time(),
            counters: Counters::default(),
            last_cleanup: Mutex::new(None),
            janitor: Mutex::new(None),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Spawn the idle-bucket janitor. No-op when already running or closed.
    pub fn start(self: &Arc<Self>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut guard = match self.janitor.lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("rate limiter janitor lock poisoned — janitor not started");
                return;
            }
        };
        if guard.is_some() {
            return;
        }
        let limiter = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let interval = self.cleanup_interval;
        *guard = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(interval) => limiter.cleanup_idle(),
                }
            }
            debug!("rate limiter janitor stopped");
        }));
        info!(
            "rate limiter janitor started (every {:?}, idle ttl {:?})",
            self.cleanup_interval, self.max_idle_time
        );
    }

    /// Stop the janitor. Safe to call more than once; only the first call
    /// does any work.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        let handle = match self.janitor.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Consume `n` global tokens. No sub-bucket involved.
    pub fn allow(&self, n: f64) -> RatchetResult<()> {
        self.charge_global(n)
    }

    /// Consume `n` tokens for `user`: global first, then the per-user
    /// bucket. A per-user denial does not refund the global charge.
    pub fn allow_user(&self, user: &str, n: f64) -> RatchetResult<()> {
        self.charge_global(n)?;
        let bucket = self.user_bucket(user);
        bucket.touch();
        if bucket.bucket.allow(n) {
            self.counters.user_allowed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            self.counters.user_denied.fetch_add(1, Ordering::Relaxed);
            Err(RatchetError::RateLimited {
                scope: RateLimitScope::User,
            })
        }
    }

    /// Consume `n` tokens for `resource`, with the same charge-first
    /// semantics as `allow_user`.
    pub fn allow_resource(&self, resource: &str, n: f64) -> RatchetResult<()> {
        self.charge_global(n)?;
        let bucket = self.resource_bucket(resource);
        bucket.touch();
        if bucket.bucket.allow(n) {
            self.counters
                .resource_allowed
                .fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            self.counters
                .resource_denied
                .fetch_add(1, Ordering::Relaxed);
            Err(RatchetError::RateLimited {
                scope: RateLimitScope::Resource,
            })
        }
    }

    /// Block until `n` tokens are available globally and for `user`, or
    /// `cancel` fires. Waits on the global bucket first, then the sub-bucket.
    pub async fn wait_user(
        &self,
        cancel: &CancellationToken,
        user: &str,
        n: f64,
    ) -> RatchetResult<()> {
        self.global.wait(cancel, n).await?;
        self.counters.global_allowed.fetch_add(1, Ordering::Relaxed);
        let bucket = self.user_bucket(user);
        bucket.touch();
        bucket.bucket.wait(cancel, n).await?;
        bucket.touch();
        self.counters.user_allowed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// `wait_user`, for the per-resource family.
    pub async fn wait_resource(
        &self,
        cancel: &CancellationToken,
        resource: &str,
        n: f64,
    ) -> RatchetResult<()> {
        self.global.wait(cancel, n).await?;
        self.counters.global_allowed.fetch_add(1, Ordering::Relaxed);
        let bucket = self.resource_bucket(resource);
        bucket.touch();
        bucket.bucket.wait(cancel, n).await?;
        bucket.touch();
        self.counters
            .resource_allowed
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            global_allowed: self.counters.global_allowed.load(Ordering::Relaxed),
            global_denied: self.counters.global_denied.load(Ordering::Relaxed),
            user_allowed: self.counters.user_allowed.load(Ordering::Relaxed),
            user_denied: self.counters.user_denied.load(Ordering::Relaxed),
            resource_allowed: self.counters.resource_allowed.load(Ordering::Relaxed),
            resource_denied: self.counters.resource_denied.load(Ordering::Relaxed),
            active_user_buckets: self.map_len(&self.users),
            active_resource_buckets: self.map_len(&self.resources),
            last_cleanup: self.last_cleanup.lock().ok().and_then(|guard| *guard),
        }
    }

    /// Drop sub-buckets idle longer than `max_idle_time`. Called by the
    /// janitor; exposed for tests and on-demand maintenance.
    pub fn cleanup_idle(&self) {
        let dropped = self.retain_fresh(&self.users) + self.retain_fresh(&self.resources);
        if let Ok(mut stamp) = self.last_cleanup.lock() {
            *stamp = Some(Utc::now());
        }
        if dropped > 0 {
            debug!("rate limiter janitor dropped {} idle sub-buckets", dropped);
        }
    }

    fn charge_global(&self, n: f64) -> RatchetResult<()> {
        if self.global.allow(n) {
            self.counters.global_allowed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            self.counters.global_denied.fetch_add(1, Ordering::Relaxed);
            Err(RatchetError::RateLimited {
                scope: RateLimitScope::Global,
            })
        }
    }

    fn user_bucket(&self, user: &str) -> Arc<SubBucket> {
        Self::get_or_create(&self.users, user, &self.per_user)
    }

    fn resource_bucket(&self, resource: &str) -> Arc<SubBucket> {
        Self::get_or_create(&self.resources, resource, &self.per_resource)
    }

    fn get_or_create(
        map: &RwLock<HashMap<String, Arc<SubBucket>>>,
        key: &str,
        limits: &BucketConfig,
    ) -> Arc<SubBucket> {
        if let Ok(guard) = map.read()
            && let Some(bucket) = guard.get(key)
        {
            return Arc::clone(bucket);
        }
        let mut guard = match map.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            guard
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(SubBucket::new(limits))),
        )
    }

    fn retain_fresh(&self, map: &RwLock<HashMap<String, Arc<SubBucket>>>) -> usize {
        let mut guard = match map.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = guard.len();
        guard.retain(|_, bucket| bucket.idle_for() < self.max_idle_time);
        before - guard.len()
    }

    fn map_len(&self, map: &RwLock<HashMap<String, Arc<SubBucket>>>) -> usize {
        match map.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
