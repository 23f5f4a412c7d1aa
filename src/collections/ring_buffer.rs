use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type OverwriteHook<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Fixed-capacity circular buffer. `push` overwrites the oldest element when
/// full; overwritten elements are handed to the overwrite hook outside the
/// structural lock.
pub struct RingBuffer<T> {
    inner: Mutex<RingInner<T>>,
    overwrite_hook: Option<OverwriteHook<T>>,
}

struct RingInner<T> {
    items: VecDeque<T>,
    capacity: usize,
    total_overwrites: u64,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(RingInner {
                items: VecDeque::with_capacity(capacity),
                capacity,
                total_overwrites: 0,
            }),
            overwrite_hook: None,
        }
    }

    /// Invoked with each overwritten element, outside the structural lock.
    pub fn with_overwrite_hook(mut self, hook: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.overwrite_hook = Some(Arc::new(hook));
        self
    }

    pub fn push(&self, item: T) {
        let overwritten = {
            let mut inner = self.lock();
            let overwritten = if inner.items.len() == inner.capacity {
                inner.total_overwrites += 1;
                inner.items.pop_front()
            } else {
                None
            };
            inner.items.push_back(item);
            overwritten
        };
        if let (Some(hook), Some(item)) = (&self.overwrite_hook, overwritten) {
            hook(item);
        }
    }

    /// All buffered items, oldest first.
    pub fn get_all(&self) -> Vec<T> {
        self.lock().items.iter().cloned().collect()
    }

    /// The newest `n` items, newest first.
    pub fn get_recent(&self, n: usize) -> Vec<T> {
        self.lock().items.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn total_overwrites(&self) -> u64 {
        self.lock().total_overwrites
    }

    pub fn clear(&self) {
        self.lock().items.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RingInner<T>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Stamped element of a [`TimedRingBuffer`].
#[derive(Debug, Clone)]
pub struct Timed<T> {
    pub item: T,
    pub at: Instant,
}

/// Ring buffer whose elements also age out: each `push` first drops items
/// strictly older than `max_age`.
pub struct TimedRingBuffer<T> {
    ring: RingBuffer<Timed<T>>,
    max_age: Duration,
}

impl<T: Clone> TimedRingBuffer<T> {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
            max_age,
        }
    }

    pub fn push(&self, item: T) {
        self.evict_aged();
        self.ring.push(Timed {
            item,
            at: Instant::now(),
        });
    }

    /// Unexpired items, oldest first.
    pub fn get_all(&self) -> Vec<T> {
        let cutoff = Instant::now();
        self.ring
            .get_all()
            .into_iter()
            .filter(|timed| cutoff.duration_since(timed.at) <= self.max_age)
            .map(|timed| timed.item)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    fn evict_aged(&self) {
        let mut inner = self.ring.lock();
        let cutoff = Instant::now();
        while let Some(front) = inner.items.front() {
            if cutoff.duration_since(front.at) > self.max_age {
                inner.items.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests;
