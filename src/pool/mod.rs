//! Pool module - bounded work queue and the worker threads draining it.

mod queue;
mod worker_pool;

pub use queue::BoundedQueue;
pub use worker_pool::{
    PoolConfig, PoolState, Task, WorkerPool, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS,
};
