//! Dedicated writer task for one connection.
//!
//! Outbound messages from any number of producers (async tasks or pool
//! worker threads) go through a bounded mpsc channel to a single task that
//! owns the write half. Frames from different producers can never
//! interleave on the wire.
//!
//! # Architecture
//!
//! ```text
//! async task ──┐
//! worker 0 ────┼─► mpsc::Sender<Message> ─► Writer Task ─► MessageWriter
//! worker N ────┘      (bounded)
//! ```
//!
//! A full channel makes producers wait. The task ends cleanly once every
//! [`WriterHandle`] is dropped, and with an error on the first failed write.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{NodeError, Result};
use crate::protocol::Message;
use crate::transport::MessageWriter;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum messages drained per wakeup.
const MAX_BATCH_SIZE: usize = 64;

/// Configuration for the writer task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Messages that may wait in the channel before producers block.
    pub channel_capacity: usize,
}

impl WriterConfig {
    /// Reject a zero channel capacity.
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(NodeError::InvalidConfig(
                "writer.channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending messages to the writer task.
///
/// Cheaply cloneable; clone one per producer.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Message>,
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Queue a message, waiting while the channel is full.
    ///
    /// Returns `Err(NotConnected)` once the writer task has stopped.
    pub async fn send(&self, message: Message) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(message).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            NodeError::NotConnected
        })
    }

    /// Queue a message from a synchronous thread, such as a pool worker.
    ///
    /// # Panics
    ///
    /// Panics if called from inside an async runtime context.
    pub fn blocking_send(&self, message: Message) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.blocking_send(message).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            NodeError::NotConnected
        })
    }

    /// Queue a message without waiting.
    ///
    /// Returns `Err(QueueFull)` when the channel is at capacity.
    pub fn try_send(&self, message: Message) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.try_send(message).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => NodeError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => NodeError::NotConnected,
            }
        })
    }

    /// Messages queued or being written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True once the writer task has stopped.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending messages.
///
/// The `JoinHandle` resolves when the task ends: `Ok(())` after all handles
/// were dropped, or the first write error.
pub fn spawn_writer_task<W>(
    writer: MessageWriter<W>,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
    };
    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Message>,
    mut writer: MessageWriter<W>,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        // All handles dropped: clean shutdown.
        if rx.recv_many(&mut batch, MAX_BATCH_SIZE).await == 0 {
            tracing::debug!("Writer channel closed");
            return Ok(());
        }

        let batch_size = batch.len();
        for message in batch.drain(..) {
            if let Err(e) = writer.send(&message).await {
                tracing::error!("Writer task stopping: {}", e);
                return Err(e);
            }
        }

        pending.fetch_sub(batch_size, Ordering::Release);
    }
}
