use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// Sentinel slot index for list ends.
const NIL: usize = usize::MAX;

type EvictHook<K, V> = Arc<dyn Fn(K, V) + Send + Sync>;
type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> usize + Send + Sync>;

/// Capacity-bounded map with LRU eviction and an optional memory bound.
///
/// O(1) get/put via a doubly-linked recency list threaded through a slot
/// arena. Structural changes happen under one internal lock; eviction hooks
/// always fire after that lock is released, so a hook may re-enter the map
/// without deadlocking.
pub struct BoundedMap<K, V> {
    inner: Mutex<Inner<K, V>>,
    evict_hook: Option<EvictHook<K, V>>,
    weigher: Option<Weigher<K, V>>,
}

struct Inner<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    /// Most recently used.
    head: usize,
    /// Least recently used — the eviction end.
    tail: usize,
    max_size: usize,
    /// 0 means no memory bound.
    max_memory: usize,
    memory_used: usize,
}

struct Slot<K, V> {
    key: K,
    value: V,
    weight: usize,
    prev: usize,
    next: usize,
}

impl<K, V> BoundedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                index: HashMap::new(),
                slots: Vec::new(),
                free: Vec::new(),
                head: NIL,
                tail: NIL,
                max_size: max_size.max(1),
                max_memory: 0,
                memory_used: 0,
            }),
            evict_hook: None,
            weigher: None,
        }
    }

    /// Also bound the total weight of stored entries. `weigher` is consulted
    /// once per insert; an entry's weight is fixed for its lifetime.
    pub fn with_memory_limit(
        mut self,
        max_memory: usize,
        weigher: impl Fn(&K, &V) -> usize + Send + Sync + 'static,
    ) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.max_memory = max_memory;
        }
        self.weigher = Some(Arc::new(weigher));
        self
    }

    /// Invoked with each evicted entry, outside the structural lock.
    pub fn with_evict_hook(mut self, hook: impl Fn(K, V) + Send + Sync + 'static) -> Self {
        self.evict_hook = Some(Arc::new(hook));
        self
    }

    /// Fetch and mark as most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        let slot_idx = *inner.index.get(key)?;
        inner.detach(slot_idx);
        inner.attach_front(slot_idx);
        inner.slots[slot_idx].as_ref().map(|slot| slot.value.clone())
    }

    /// Fetch without touching recency.
    pub fn peek(&self, key: &K) -> Option<V> {
        let inner = self.lock();
        let slot_idx = *inner.index.get(key)?;
        inner.slots[slot_idx].as_ref().map(|slot| slot.value.clone())
    }

    /// Insert or update, then evict from the LRU tail until both bounds
    /// hold again.
    pub fn put(&self, key: K, value: V) {
        let weight = self
            .weigher
            .as_ref()
            .map(|weigher| weigher(&key, &value))
            .unwrap_or(0);
        let evicted = {
            let mut inner = self.lock();
            if let Some(&slot_idx) = inner.index.get(&key) {
                // Present: update value and weight, move to front.
                let old_weight = inner.slots[slot_idx]
                    .as_ref()
                    .map(|slot| slot.weight)
                    .unwrap_or(0);
                if let Some(slot) = inner.slots[slot_idx].as_mut() {
                    slot.value = value;
                    slot.weight = weight;
                }
                inner.memory_used = inner.memory_used - old_weight + weight;
                inner.detach(slot_idx);
                inner.attach_front(slot_idx);
            } else {
                let slot_idx = inner.alloc(Slot {
                    key: key.clone(),
                    value,
                    weight,
                    prev: NIL,
                    next: NIL,
                });
                inner.index.insert(key, slot_idx);
                inner.attach_front(slot_idx);
                inner.memory_used += weight;
            }
            inner.evict_overflow()
        };
        self.fire_hooks(evicted);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        let slot_idx = inner.index.remove(key)?;
        inner.detach(slot_idx);
        inner.release(slot_idx).map(|slot| slot.value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.lock().index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn memory_used(&self) -> usize {
        self.lock().memory_used
    }

    /// Drop every entry. Entries are collected under the lock and hooks
    /// fire after it is released.
    pub fn clear(&self) {
        let drained = {
            let mut inner = self.lock();
            let mut drained = Vec::with_capacity(inner.index.len());
            while inner.tail != NIL {
                let tail = inner.tail;
                inner.detach(tail);
                if let Some(slot) = inner.release(tail) {
                    inner.index.remove(&slot.key);
                    drained.push((slot.key, slot.value));
                }
            }
            inner.memory_used = 0;
            inner.index.clear();
            drained
        };
        self.fire_hooks(drained);
    }

    /// Keys from most to least recently used. Test/diagnostic helper.
    pub fn recency_order(&self) -> Vec<K> {
        let inner = self.lock();
        let mut keys = Vec::with_capacity(inner.index.len());
        let mut cursor = inner.head;
        while cursor != NIL {
            if let Some(slot) = inner.slots[cursor].as_ref() {
                keys.push(slot.key.clone());
                cursor = slot.next;
            } else {
                break;
            }
        }
        keys
    }

    fn fire_hooks(&self, evicted: Vec<(K, V)>) {
        if let Some(hook) = &self.evict_hook {
            for (key, value) in evicted {
                hook(key, value);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K, V>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn alloc(&mut self, slot: Slot<K, V>) -> usize {
        if let Some(slot_idx) = self.free.pop() {
            self.slots[slot_idx] = Some(slot);
            slot_idx
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        }
    }

    fn release(&mut self, slot_idx: usize) -> Option<Slot<K, V>> {
        let slot = self.slots[slot_idx].take()?;
        self.memory_used = self.memory_used.saturating_sub(slot.weight);
        self.free.push(slot_idx);
        Some(slot)
    }

    fn detach(&mut self, slot_idx: usize) {
        let (prev, next) = match self.slots[slot_idx].as_ref() {
            Some(slot) => (slot.prev, slot.next),
            None => return,
        };
        if prev != NIL {
            if let Some(slot) = self.slots[prev].as_mut() {
                slot.next = next;
            }
        } else {
            self.head = next;
        }
        if next != NIL {
            if let Some(slot) = self.slots[next].as_mut() {
                slot.prev = prev;
            }
        } else {
            self.tail = prev;
        }
        if let Some(slot) = self.slots[slot_idx].as_mut() {
            slot.prev = NIL;
            slot.next = NIL;
        }
    }

    fn attach_front(&mut self, slot_idx: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slots[slot_idx].as_mut() {
            slot.prev = NIL;
            slot.next = old_head;
        }
        if old_head != NIL {
            if let Some(slot) = self.slots[old_head].as_mut() {
                slot.prev = slot_idx;
            }
        }
        self.head = slot_idx;
        if self.tail == NIL {
            self.tail = slot_idx;
        }
    }

    /// Evict from the tail until size and memory bounds hold. Returns the
    /// evicted entries for hook delivery outside the lock.
    fn evict_overflow(&mut self) -> Vec<(K, V)> {
        let mut evicted = Vec::new();
        loop {
            let over_size = self.index.len() > self.max_size;
            let over_memory = self.max_memory > 0 && self.memory_used > self.max_memory;
            if !(over_size || over_memory) || self.tail == NIL {
                break;
            }
            let tail = self.tail;
            self.detach(tail);
            if let Some(slot) = self.release(tail) {
                self.index.remove(&slot.key);
                evicted.push((slot.key, slot.value));
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests;
