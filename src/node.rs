//! Connection dispatch: receive, run on the pool, reply.
//!
//! ```text
//! MessageReader ─► Task "{type}#{seq}" ─► WorkerPool ─► MessageHandler
//!                                                          │
//! MessageWriter ◄── writer task ◄── WriterHandle ◄─────────┘ (reply)
//! ```
//!
//! The async receive loop never runs handler code. Handlers execute on pool
//! worker threads and hand their replies to the connection's writer task,
//! which keeps frames from concurrent handlers whole on the wire.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{NodeError, Result};
use crate::pool::{Task, WorkerPool};
use crate::protocol::{ErrorReport, Message, MessageType};
use crate::transport::Connection;
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Default time a peer may stay silent before its session is dropped.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Per-connection settings for [`serve_connection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub writer: WriterConfig,
    /// Milliseconds without an inbound frame before the session ends with
    /// `Timeout`. Peers keep an idle session alive with heartbeats. `None`
    /// waits forever.
    pub idle_timeout_ms: Option<u64>,
}

impl SessionConfig {
    /// The idle limit as a [`Duration`].
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// Reject a zero idle timeout and an invalid writer section.
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout_ms == Some(0) {
            return Err(NodeError::InvalidConfig(
                "session.idle_timeout_ms must be at least 1".to_string(),
            ));
        }
        self.writer.validate()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            idle_timeout_ms: Some(DEFAULT_IDLE_TIMEOUT_MS),
        }
    }
}

/// Processes one inbound message on a worker thread.
///
/// `Ok(Some(reply))` is sent back on the same connection, `Ok(None)` sends
/// nothing, and `Err` is answered with an `Error` message.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: Message) -> Result<Option<Message>>;
}

impl<F> MessageHandler for F
where
    F: Fn(Message) -> Result<Option<Message>> + Send + Sync + 'static,
{
    fn handle(&self, message: Message) -> Result<Option<Message>> {
        self(message)
    }
}

/// Build the `Error` message reporting a failed request.
pub fn error_reply(request_type: u8, error: &NodeError) -> Result<Message> {
    Message::with_body(
        MessageType::Error,
        &ErrorReport {
            request_type,
            message: error.to_string(),
        },
    )
}

/// Serve one connection until the peer closes it.
///
/// Every received message becomes a pool task. Messages with an unknown type
/// code are answered with an `Error` message and the loop continues. A peer
/// that sends nothing for the configured idle timeout is dropped with
/// `Err(Timeout)`. Returns `Ok(())` on orderly close, or the first error that
/// leaves the stream unusable or the pool unable to accept work. Before
/// returning it waits for replies of already submitted tasks to be written.
pub async fn serve_connection<S, H>(
    connection: Connection<S>,
    pool: Arc<WorkerPool>,
    handler: Arc<H>,
    config: SessionConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    H: MessageHandler + ?Sized,
{
    let (mut reader, writer) = connection.into_split();
    let idle_timeout = config.idle_timeout();
    let (outbound, writer_task) = spawn_writer_task(writer, config.writer);
    let mut seq: u64 = 0;

    let result = loop {
        let received = match idle_timeout {
            Some(limit) => reader.receive_timeout(limit).await,
            None => reader.receive().await,
        };
        let message = match received {
            Ok(message) => message,
            Err(NodeError::PeerClosed) => break Ok(()),
            Err(NodeError::UnknownMessageType(code)) => {
                let sent = match error_reply(code, &NodeError::UnknownMessageType(code)) {
                    Ok(reply) => outbound.send(reply).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    break Err(e);
                }
                continue;
            }
            Err(e) => break Err(e),
        };

        seq += 1;
        let name = format!("{}#{}", message.msg_type, seq);
        let task = {
            let handler = handler.clone();
            let outbound = outbound.clone();
            Task::new(name, move || run_handler(&*handler, message, &outbound))
        };

        // Submit may block on backpressure; keep that off the runtime threads.
        let pool = pool.clone();
        match tokio::task::spawn_blocking(move || pool.submit(task)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => break Err(e),
            Err(e) => break Err(NodeError::Io(std::io::Error::other(e.to_string()))),
        }
    };

    drop(outbound);
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("Writer ended with error: {}", e),
        Err(e) => tracing::error!("Writer task failed: {}", e),
    }

    match &result {
        Ok(()) => tracing::info!(messages = seq, "Connection closed by peer"),
        Err(e) => tracing::warn!(messages = seq, "Connection ended: {}", e),
    }
    result
}

fn run_handler<H>(handler: &H, message: Message, outbound: &WriterHandle)
where
    H: MessageHandler + ?Sized,
{
    let request_type = message.msg_type;

    let reply = match handler.handle(message) {
        Ok(Some(reply)) => reply,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(msg_type = %request_type, "Handler failed: {}", e);
            match error_reply(request_type.code(), &e) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!("Failed to encode error reply: {}", e);
                    return;
                }
            }
        }
    };

    if let Err(e) = outbound.blocking_send(reply) {
        tracing::debug!(msg_type = %request_type, "Reply dropped: {}", e);
    }
}
