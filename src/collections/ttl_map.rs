use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct TtlEntry<V> {
    value: V,
    created_at: Instant,
    expires_at: Instant,
}

/// Age- and size-bounded map.
///
/// Writes stamp an expiry; reads that find an expired entry drop it and
/// report a miss. Expired entries are also collected by a periodic janitor
/// (started explicitly) and by the on-demand [`TtlMap::purge_expired`].
/// Over-size writes evict the entry with the earliest `created_at`, checked
/// against the map again before deletion so a concurrent replacement wins.
pub struct TtlMap<K, V> {
    inner: Arc<Mutex<HashMap<K, TtlEntry<V>>>>,
    ttl: Duration,
    /// 0 means unbounded.
    max_size: usize,
    janitor: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl<K, V> TtlMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self::bounded(ttl, 0)
    }

    pub fn bounded(ttl: Duration, max_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            max_size,
            janitor: Mutex::new(None),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        let mut map = self.lock();
        map.insert(
            key,
            TtlEntry {
                value,
                created_at: now,
                expires_at: now + self.ttl,
            },
        );
        if self.max_size > 0 {
            while map.len() > self.max_size {
                // FIFO eviction: earliest created_at goes first. Re-check the
                // stamp before deleting; if another writer replaced the entry
                // in the meantime, leave the newer one alone.
                let victim = map
                    .iter()
                    .min_by_key(|(_, entry)| entry.created_at)
                    .map(|(key, entry)| (key.clone(), entry.created_at));
                let Some((victim_key, stamp)) = victim else {
                    break;
                };
                let removed = match map.get(&victim_key) {
                    Some(entry) if entry.created_at == stamp => map.remove(&victim_key).is_some(),
                    _ => false,
                };
                if !removed {
                    break;
                }
            }
        }
    }

    /// Fetch a live value. An expired entry is removed and reported as a
    /// miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut map = self.lock();
        match map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().remove(key).map(|entry| entry.value)
    }

    /// Push a live entry's expiry out by `extra`. No-op on expired or
    /// missing keys.
    pub fn extend(&self, key: &K, extra: Duration) -> bool {
        let mut map = self.lock();
        match map.get_mut(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.expires_at += extra;
                true
            }
            _ => false,
        }
    }

    /// Restart a live entry's full TTL from now. No-op on expired or
    /// missing keys.
    pub fn touch(&self, key: &K) -> bool {
        let mut map = self.lock();
        match map.get_mut(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.expires_at = Instant::now() + self.ttl;
                true
            }
            _ => false,
        }
    }

    /// Live entry count. Expired-but-uncollected entries are not counted.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry now. Returns how many were collected.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, entry| entry.expires_at > now);
        before - map.len()
    }

    /// Spawn the periodic janitor. No-op when already running or closed.
    pub fn start_janitor(self: &Arc<Self>, interval: Duration) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut guard = match self.janitor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return;
        }
        let map = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        *guard = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        let purged = map.purge_expired();
                        if purged > 0 {
                            debug!("ttl map janitor purged {} expired entries", purged);
                        }
                    }
                }
            }
        }));
    }

    /// Stop the janitor. Only the first call does any work.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        let handle = match self.janitor.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, TtlEntry<V>>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
