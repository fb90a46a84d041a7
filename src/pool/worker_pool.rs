//! Bounded worker pool.
//!
//! A fixed set of OS threads drains one shared [`BoundedQueue`]. Producers
//! block while the queue is full (backpressure), workers block while it is
//! empty. Shutdown stops intake and drains what is already queued.
//!
//! ```text
//! submit ─┐                         ┌─► worker 0 ─► task()
//! submit ─┼─► [ ring buffer (C) ] ──┼─► worker 1 ─► task()
//! submit ─┘   Mutex + 2 Condvars    └─► worker N ─► task()
//! ```
//!
//! Queue state (ring buffer and shutdown flag) is only touched under the
//! lock. Tasks always run with the lock released.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use korra_node::pool::{PoolConfig, WorkerPool};
//!
//! let pool = WorkerPool::new(PoolConfig::default()).unwrap();
//! let hits = Arc::new(AtomicUsize::new(0));
//!
//! for _ in 0..10 {
//!     let hits = hits.clone();
//!     pool.execute("count", move || {
//!         hits.fetch_add(1, Ordering::SeqCst);
//!     })
//!     .unwrap();
//! }
//!
//! pool.shutdown().unwrap();
//! assert_eq!(hits.load(Ordering::SeqCst), 10);
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use super::queue::BoundedQueue;
use crate::diagnostics::panic_message;
use crate::error::{NodeError, Result};

/// Default number of worker threads.
pub const DEFAULT_WORKERS: usize = 8;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A named unit of work.
///
/// The closure captures whatever state it needs. Ownership moves into the
/// pool on submit and exactly one worker runs it.
pub struct Task {
    name: String,
    action: Box<dyn FnOnce() + Send + 'static>,
}

impl Task {
    /// Create a task with a diagnostic name.
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Box::new(action),
        }
    }

    /// Diagnostic name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued (not yet running) tasks.
    pub queue_capacity: usize,
}

impl PoolConfig {
    /// Config with `workers` threads and room for `queue_capacity` queued tasks.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
        }
    }

    /// Reject configurations the pool cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(NodeError::InvalidConfig(
                "pool.workers must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(NodeError::InvalidConfig(
                "pool.queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Lifecycle of a pool. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting work.
    Running,
    /// Shutdown requested; queued work is draining.
    ShuttingDown,
    /// All workers joined.
    Stopped,
}

struct QueueState {
    queue: BoundedQueue<Task>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// Fixed-size pool of worker threads fed by a bounded FIFO queue.
///
/// The pool is `Send + Sync`; share it behind an `Arc` to submit from
/// several threads. Do not call [`shutdown`](Self::shutdown) from inside a
/// task: the worker would wait on itself.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Option<Vec<JoinHandle<()>>>>,
    stopped: AtomicBool,
    config: PoolConfig,
}

impl WorkerPool {
    /// Start the pool's worker threads.
    ///
    /// If a thread fails to spawn, already started workers are stopped and
    /// the spawn error is returned.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                queue: BoundedQueue::with_capacity(config.queue_capacity),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            completed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(config.workers);
        for id in 0..config.workers {
            let worker_shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("korra-worker-{}", id))
                .spawn(move || worker_loop(id, worker_shared));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    tracing::error!(worker = id, "Failed to spawn worker thread: {}", e);
                    request_shutdown(&shared);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(NodeError::Io(e));
                }
            }
        }

        tracing::debug!(
            workers = config.workers,
            capacity = config.queue_capacity,
            "Worker pool initialized"
        );

        Ok(Self {
            shared,
            workers: Mutex::new(Some(workers)),
            stopped: AtomicBool::new(false),
            config,
        })
    }

    /// Submit a task, blocking while the queue is full.
    ///
    /// Returns `Err(PoolShutdown)` once shutdown has been requested, even if
    /// the caller was already waiting for space. Wakes exactly one worker.
    pub fn submit(&self, task: Task) -> Result<()> {
        let mut state = self.shared.state.lock();

        while state.queue.is_full() && !state.shutdown {
            self.shared.not_full.wait(&mut state);
        }

        self.enqueue(&mut state, task)
    }

    /// Submit without blocking.
    ///
    /// Returns `Err(QueueFull)` when no slot is free.
    pub fn try_submit(&self, task: Task) -> Result<()> {
        let mut state = self.shared.state.lock();

        if !state.shutdown && state.queue.is_full() {
            return Err(NodeError::QueueFull);
        }

        self.enqueue(&mut state, task)
    }

    /// Wrap a closure in a [`Task`] and [`submit`](Self::submit) it.
    pub fn execute<F>(&self, name: impl Into<String>, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Task::new(name, action))
    }

    fn enqueue(&self, state: &mut QueueState, task: Task) -> Result<()> {
        if state.shutdown {
            tracing::warn!(task = %task.name, "Rejected task, pool is shutting down");
            return Err(NodeError::PoolShutdown);
        }

        tracing::debug!(
            task = %task.name,
            size = state.queue.len() + 1,
            "Task added to queue"
        );
        state.queue.push(task).map_err(|_| NodeError::QueueFull)?;

        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Stop intake, drain queued tasks, and join every worker.
    ///
    /// Blocked producers are woken and rejected. Queued tasks still run
    /// before this returns, for every caller: a concurrent call waits until
    /// the first one has joined the workers. Calling it again after it
    /// returned is a no-op.
    pub fn shutdown(&self) -> Result<()> {
        // Held until the workers are joined.
        let mut slot = self.workers.lock();
        let workers = match slot.take() {
            Some(workers) => workers,
            None => return Ok(()),
        };

        tracing::debug!("Shutting down worker pool");
        request_shutdown(&self.shared);

        let mut failed = 0usize;
        for handle in workers {
            if handle.join().is_err() {
                failed += 1;
            }
        }

        self.stopped.store(true, Ordering::Release);
        drop(slot);

        if failed > 0 {
            tracing::error!(failed, "Worker threads terminated abnormally");
            return Err(NodeError::Io(std::io::Error::other(format!(
                "{} worker threads terminated abnormally",
                failed
            ))));
        }

        tracing::debug!(
            completed = self.completed_tasks(),
            panicked = self.panicked_tasks(),
            "Worker pool shutdown complete"
        );
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PoolState {
        if self.stopped.load(Ordering::Acquire) {
            PoolState::Stopped
        } else if self.shared.state.lock().shutdown {
            PoolState::ShuttingDown
        } else {
            PoolState::Running
        }
    }

    /// Tasks queued but not yet picked up by a worker.
    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Queue capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.config.queue_capacity
    }

    /// Number of worker threads.
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.config.workers
    }

    /// Tasks that ran to completion.
    pub fn completed_tasks(&self) -> u64 {
        self.shared.completed.load(Ordering::Acquire)
    }

    /// Tasks that panicked. Their workers kept running.
    pub fn panicked_tasks(&self) -> u64 {
        self.shared.panicked.load(Ordering::Acquire)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("Worker pool shutdown on drop failed: {}", e);
        }
    }
}

fn request_shutdown(shared: &Shared) {
    shared.state.lock().shutdown = true;
    shared.not_empty.notify_all();
    shared.not_full.notify_all();
}

fn worker_loop(id: usize, shared: Arc<Shared>) {
    loop {
        let task = {
            let mut state = shared.state.lock();

            while state.queue.is_empty() && !state.shutdown {
                shared.not_empty.wait(&mut state);
            }

            // Empty here means shutdown was requested and the queue drained.
            match state.queue.pop() {
                Some(task) => task,
                None => break,
            }
        };
        shared.not_full.notify_one();

        tracing::debug!(worker = id, task = %task.name, "Executing task");

        let Task { name, action } = task;
        match panic::catch_unwind(AssertUnwindSafe(action)) {
            Ok(()) => {
                shared.completed.fetch_add(1, Ordering::AcqRel);
            }
            Err(payload) => {
                shared.panicked.fetch_add(1, Ordering::AcqRel);
                tracing::error!(
                    worker = id,
                    task = %name,
                    "Task panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    tracing::debug!(worker = id, "Worker exiting");
}
