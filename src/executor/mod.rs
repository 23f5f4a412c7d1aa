pub mod aggregator;
pub mod batch;
pub mod graph;
pub mod pool;
pub mod scheduler;

pub use aggregator::ResultAggregator;
pub use batch::{BatchOptions, BatchRequest, BatchResult, BatchStatus};
pub use graph::{DependencyGraph, NodeStatus};
pub use pool::{ExecutorPool, PoolStats};
pub use scheduler::BatchScheduler;
