use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn push_within_capacity_keeps_everything() {
    let ring = RingBuffer::new(4);
    for i in 0..3 {
        ring.push(i);
    }
    assert_eq!(ring.get_all(), vec![0, 1, 2]);
    assert_eq!(ring.total_overwrites(), 0);
}

#[test]
fn push_over_capacity_overwrites_oldest() {
    let ring = RingBuffer::new(3);
    for i in 0..5 {
        ring.push(i);
    }
    assert_eq!(ring.get_all(), vec![2, 3, 4]);
    assert_eq!(ring.total_overwrites(), 2);
    assert_eq!(ring.len(), 3);
}

#[test]
fn get_recent_is_newest_first() {
    let ring = RingBuffer::new(8);
    for i in 0..5 {
        ring.push(i);
    }
    assert_eq!(ring.get_recent(3), vec![4, 3, 2]);
    assert_eq!(ring.get_recent(99).len(), 5);
}

#[test]
fn overwrite_hook_receives_displaced_items() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let ring = RingBuffer::new(2).with_overwrite_hook(move |item: i32| {
        sink.lock().unwrap().push(item);
    });
    for i in 0..4 {
        ring.push(i);
    }
    assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
}

#[test]
fn hook_may_reenter_the_ring() {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let ring = RingBuffer::new(1).with_overwrite_hook(move |_item: u8| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    ring.push(1);
    ring.push(2);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn timed_ring_drops_aged_items_on_push() {
    let ring = TimedRingBuffer::new(8, Duration::from_millis(30));
    ring.push("old");
    std::thread::sleep(Duration::from_millis(60));
    ring.push("new");
    assert_eq!(ring.get_all(), vec!["new"]);
}

#[test]
fn timed_ring_keeps_fresh_items() {
    let ring = TimedRingBuffer::new(8, Duration::from_secs(60));
    ring.push(1);
    ring.push(2);
    assert_eq!(ring.get_all(), vec![1, 2]);
}
