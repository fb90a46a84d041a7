//! # korra-node
//!
//! Messaging and execution substrate for a distributed node.
//!
//! This crate provides two independent pieces and the glue between them:
//!
//! - **Worker pool**: a fixed set of OS threads draining a bounded FIFO
//!   queue, with blocking backpressure and drain-on-shutdown.
//! - **KRRA protocol**: typed messages framed by a 12-byte big-endian header
//!   (magic `"KRRA"`, version, type, size), sent over TCP or any async
//!   byte stream.
//!
//! [`serve_connection`] ties them together: every received message runs on
//! the pool, and replies go back through a per-connection writer task.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use korra_node::{serve_connection, Message, NodeConfig, Transport, WorkerPool};
//!
//! #[tokio::main]
//! async fn main() -> korra_node::Result<()> {
//!     let config = NodeConfig::default();
//!     let pool = Arc::new(WorkerPool::new(config.pool.clone())?);
//!     let server = Transport::bind(&config.listen_addr).await?;
//!
//!     let echo = |message: Message| Ok(Some(message));
//!     let handler = Arc::new(echo);
//!
//!     loop {
//!         let connection = server.accept().await?;
//!         tokio::spawn(serve_connection(
//!             connection,
//!             pool.clone(),
//!             handler.clone(),
//!             config.session.clone(),
//!         ));
//!     }
//! }
//! ```

pub mod agent;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod node;
pub mod pool;
pub mod protocol;
pub mod transport;
pub mod writer;

pub use agent::{AgentEngine, AgentHandle, AgentHandler};
pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use node::{serve_connection, MessageHandler, SessionConfig};
pub use pool::{PoolConfig, PoolState, Task, WorkerPool};
pub use protocol::{FrameHeader, Message, MessageType};
pub use transport::{Connection, Role, Transport, TransportConfig};
pub use writer::{spawn_writer_task, WriterConfig, WriterHandle};
