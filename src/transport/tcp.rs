//! TCP transport in server or client role.
//!
//! - Server: socket with `SO_REUSEADDR`, bound and listening. Peers are
//!   taken with [`Transport::accept`], each as its own [`Connection`].
//! - Client: connected stream; [`Transport::send`] and
//!   [`Transport::receive`] work directly on it.
//!
//! No operation retries. Any OS-level failure is returned as
//! [`NodeError::Io`].
//!
//! # Example
//!
//! ```ignore
//! use korra_node::transport::Transport;
//! use korra_node::protocol::Message;
//!
//! let server = Transport::bind("127.0.0.1:7400").await?;
//! let mut client = Transport::connect("127.0.0.1:7400").await?;
//! let mut session = server.accept().await?;
//!
//! client.send(&Message::heartbeat()).await?;
//! let message = session.receive().await?;
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use super::connection::Connection;
use crate::error::{NodeError, Result};
use crate::protocol::{Message, DEFAULT_MAX_PAYLOAD_SIZE};

/// Default listen backlog.
pub const DEFAULT_BACKLOG: u32 = 10;

/// Transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Pending-connection queue length for the server socket.
    pub backlog: u32,
    /// Largest payload accepted on receive.
    pub max_payload_size: u32,
}

impl TransportConfig {
    /// Reject a zero payload limit.
    pub fn validate(&self) -> Result<()> {
        if self.max_payload_size == 0 {
            return Err(NodeError::InvalidConfig(
                "transport.max_payload_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// Which end of the link a transport is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}

/// A TCP endpoint in one role.
pub struct Transport {
    role: Role,
    config: TransportConfig,
    local_addr: SocketAddr,
    listener: Option<TcpListener>,
    connection: Option<Connection<TcpStream>>,
}

impl Transport {
    /// Open a transport on `addr` in the given role.
    ///
    /// A server binds and listens on `addr`; a client connects to it.
    pub async fn initialize(addr: &str, role: Role, config: TransportConfig) -> Result<Self> {
        config.validate()?;
        let target = resolve(addr).await?;

        match role {
            Role::Server => {
                let socket = if target.is_ipv4() {
                    TcpSocket::new_v4()?
                } else {
                    TcpSocket::new_v6()?
                };
                socket.set_reuseaddr(true)?;
                socket.bind(target)?;
                let listener = socket.listen(config.backlog)?;
                let local_addr = listener.local_addr()?;

                tracing::info!(addr = %local_addr, backlog = config.backlog, "Server listening");

                Ok(Self {
                    role,
                    config,
                    local_addr,
                    listener: Some(listener),
                    connection: None,
                })
            }
            Role::Client => {
                let stream = TcpStream::connect(target).await?;
                let local_addr = stream.local_addr()?;

                tracing::info!(peer = %target, "Connected to server");

                Ok(Self {
                    role,
                    local_addr,
                    listener: None,
                    connection: Some(Connection::with_max_payload(
                        stream,
                        config.max_payload_size,
                    )),
                    config,
                })
            }
        }
    }

    /// Server with default settings.
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::initialize(addr, Role::Server, TransportConfig::default()).await
    }

    /// Client with default settings.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::initialize(addr, Role::Client, TransportConfig::default()).await
    }

    /// Wait for the next peer and return it as an independent connection.
    ///
    /// Only valid in the server role. The transport's own connected state
    /// does not change.
    pub async fn accept(&self) -> Result<Connection<TcpStream>> {
        let listener = match (&self.role, &self.listener) {
            (Role::Server, Some(listener)) => listener,
            (Role::Server, None) => return Err(NodeError::NotConnected),
            (Role::Client, _) => return Err(NodeError::NotServer),
        };

        let (stream, peer) = listener.accept().await?;
        tracing::info!(peer = %peer, "Accepted connection");

        Ok(Connection::with_max_payload(
            stream,
            self.config.max_payload_size,
        ))
    }

    /// Send on the client connection.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        self.connection_mut()?.send(message).await
    }

    /// Receive on the client connection.
    pub async fn receive(&mut self) -> Result<Message> {
        self.connection_mut()?.receive().await
    }

    /// Receive on the client connection with a deadline.
    pub async fn receive_timeout(&mut self, timeout: Duration) -> Result<Message> {
        self.connection_mut()?.receive_timeout(timeout).await
    }

    /// Release the listener or stream. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.listener.take().is_some() {
            tracing::info!(addr = %self.local_addr, "Server closed");
        }
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
            tracing::info!(addr = %self.local_addr, "Client connection closed");
        }
    }

    /// True only for a client whose stream is still usable.
    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .map(Connection::is_connected)
            .unwrap_or(false)
    }

    /// Server or client.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Bound address. For a server started on port 0 this is the real port.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Settings this transport was created with.
    #[inline]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Take the client connection out, e.g. to split it.
    pub fn into_connection(mut self) -> Result<Connection<TcpStream>> {
        self.connection.take().ok_or(NodeError::NotConnected)
    }

    fn connection_mut(&mut self) -> Result<&mut Connection<TcpStream>> {
        self.connection.as_mut().ok_or(NodeError::NotConnected)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("role", &self.role)
            .field("local_addr", &self.local_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr).await?.next().ok_or_else(|| {
        NodeError::Io(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("no address resolved for {}", addr),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    #[test]
    fn test_transport_config_default() {
        let config = TransportConfig::default();
        assert_eq!(config.backlog, DEFAULT_BACKLOG);
        assert_eq!(config.max_payload_size, DEFAULT_MAX_PAYLOAD_SIZE);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_server_reports_bound_port() {
        let server = Transport::bind("127.0.0.1:0").await.unwrap();
        assert_eq!(server.role(), Role::Server);
        assert_ne!(server.local_addr().port(), 0);
        assert!(!server.is_connected());
    }

    #[tokio::test]
    async fn test_server_cannot_send() {
        let mut server = Transport::bind("127.0.0.1:0").await.unwrap();
        assert!(matches!(
            server.send(&Message::heartbeat()).await,
            Err(NodeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_client_cannot_accept() {
        let server = Transport::bind("127.0.0.1:0").await.unwrap();
        let client = Transport::connect(&server.local_addr().to_string())
            .await
            .unwrap();

        assert!(matches!(client.accept().await, Err(NodeError::NotServer)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Grab a free port, then release it so nothing listens there.
        let port = {
            let probe = Transport::bind("127.0.0.1:0").await.unwrap();
            probe.local_addr().port()
        };

        let result = Transport::connect(&format!("127.0.0.1:{}", port)).await;
        assert!(matches!(result, Err(NodeError::Io(_))));
    }

    #[tokio::test]
    async fn test_client_server_exchange() {
        let server = Transport::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().to_string();

        let accept = tokio::spawn(async move {
            let mut session = server.accept().await.unwrap();
            let request = session.receive().await.unwrap();
            session.send(&request).await.unwrap();
            session
        });

        let mut client = Transport::connect(&addr).await.unwrap();
        assert!(client.is_connected());

        let request = Message::new(MessageType::StateSync, &b"state"[..]);
        client.send(&request).await.unwrap();
        assert_eq!(client.receive().await.unwrap(), request);

        let _session = accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let server = Transport::bind("127.0.0.1:0").await.unwrap();
        let mut client = Transport::connect(&server.local_addr().to_string())
            .await
            .unwrap();

        client.close().await;
        client.close().await;

        assert!(!client.is_connected());
        assert!(matches!(
            client.receive().await,
            Err(NodeError::NotConnected)
        ));
    }
}
