pub mod bounded_map;
pub mod ring_buffer;
pub mod ttl_map;

pub use bounded_map::BoundedMap;
pub use ring_buffer::{RingBuffer, TimedRingBuffer};
pub use ttl_map::TtlMap;
