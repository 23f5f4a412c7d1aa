use super::*;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn put_get_round_trip() {
    let map = BoundedMap::new(4);
    map.put("a", 1);
    map.put("b", 2);
    assert_eq!(map.get(&"a"), Some(1));
    assert_eq!(map.get(&"b"), Some(2));
    assert_eq!(map.get(&"c"), None);
}

#[test]
fn evicts_least_recently_used() {
    let map = BoundedMap::new(2);
    map.put("a", 1);
    map.put("b", 2);
    // Touch "a" so "b" becomes the LRU entry.
    assert_eq!(map.get(&"a"), Some(1));
    map.put("c", 3);
    assert_eq!(map.len(), 2);
    assert!(map.contains_key(&"a"));
    assert!(!map.contains_key(&"b"));
    assert!(map.contains_key(&"c"));
}

#[test]
fn update_moves_to_front_and_keeps_size() {
    let map = BoundedMap::new(2);
    map.put("a", 1);
    map.put("b", 2);
    map.put("a", 10);
    assert_eq!(map.len(), 2);
    assert_eq!(map.recency_order(), vec!["a", "b"]);
    assert_eq!(map.get(&"a"), Some(10));
}

#[test]
fn memory_bound_evicts_tail() {
    let map = BoundedMap::new(100).with_memory_limit(10, |_k, v: &Vec<u8>| v.len());
    map.put("a", vec![0u8; 4]);
    map.put("b", vec![0u8; 4]);
    map.put("c", vec![0u8; 4]);
    // 12 bytes > 10: "a" (tail) is evicted.
    assert!(!map.contains_key(&"a"));
    assert!(map.memory_used() <= 10);
}

#[test]
fn evict_hook_fires_for_evicted_entries() {
    let evictions = Arc::new(AtomicUsize::new(0));
    let counter = evictions.clone();
    let map = BoundedMap::new(1).with_evict_hook(move |_k: &'static str, _v: i32| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    map.put("a", 1);
    map.put("b", 2);
    map.put("c", 3);
    assert_eq!(evictions.load(Ordering::SeqCst), 2);
}

#[test]
fn hook_may_reenter_the_map() {
    // The hook fires outside the structural lock, so re-entering is legal.
    let probe: Arc<BoundedMap<String, i32>> = Arc::new(BoundedMap::new(8));
    let probe_ref = probe.clone();
    let map = BoundedMap::new(1).with_evict_hook(move |k: String, v: i32| {
        probe_ref.put(k, v);
    });
    map.put("a".to_string(), 1);
    map.put("b".to_string(), 2);
    assert_eq!(probe.get(&"a".to_string()), Some(1));
}

#[test]
fn clear_fires_hooks_for_everything() {
    let evictions = Arc::new(AtomicUsize::new(0));
    let counter = evictions.clone();
    let map = BoundedMap::new(8).with_evict_hook(move |_k: u32, _v: u32| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    for i in 0..5 {
        map.put(i, i);
    }
    map.clear();
    assert_eq!(evictions.load(Ordering::SeqCst), 5);
    assert!(map.is_empty());
    assert_eq!(map.memory_used(), 0);
}

#[test]
fn remove_returns_value_without_hook() {
    let evictions = Arc::new(AtomicUsize::new(0));
    let counter = evictions.clone();
    let map = BoundedMap::new(8).with_evict_hook(move |_k: u32, _v: u32| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    map.put(1, 10);
    assert_eq!(map.remove(&1), Some(10));
    assert_eq!(map.remove(&1), None);
    assert_eq!(evictions.load(Ordering::SeqCst), 0);
}

proptest! {
    /// After any operation sequence the map respects its capacity and every
    /// live key appears exactly once in the recency list.
    #[test]
    fn capacity_and_order_invariants(ops in prop::collection::vec((0u8..3, 0u16..32), 0..200)) {
        let map = BoundedMap::new(8);
        for (op, key) in ops {
            match op {
                0 => map.put(key, u32::from(key)),
                1 => { let _ = map.get(&key); }
                _ => { let _ = map.remove(&key); }
            }
            prop_assert!(map.len() <= 8);
            let order = map.recency_order();
            prop_assert_eq!(order.len(), map.len());
            let unique: std::collections::HashSet<_> = order.iter().collect();
            prop_assert_eq!(unique.len(), order.len());
        }
    }
}
