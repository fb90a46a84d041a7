//! Framed message I/O over any async byte stream.
//!
//! A [`Connection`] owns one stream and sends/receives whole [`Message`]s.
//! It is generic over `AsyncRead + AsyncWrite` so the same framing runs over
//! TCP sockets and in-memory duplex pipes.
//!
//! # Receive path
//!
//! ```text
//! read 12 header bytes (loop over partial reads)
//!   ├─ EOF before any byte  → PeerClosed, disconnected
//!   ├─ EOF inside header    → Truncated, disconnected
//!   ├─ bad magic / version  → error, payload left unread
//!   └─ payload_size > max   → PayloadTooLarge, nothing allocated
//! reserve payload buffer (fallible)
//! read payload (loop over partial reads)
//!   └─ EOF inside payload   → PeerClosed, disconnected
//! map type code
//!   └─ unknown code         → UnknownMessageType, payload consumed
//! ```
//!
//! Writes put the header first and the payload second, each to completion.
//! A failed write marks the connection disconnected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use crate::diagnostics::hexdump;
use crate::error::{NodeError, Result};
use crate::protocol::{
    FrameHeader, Message, MessageType, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE,
};

/// Bidirectional framed connection.
///
/// # Example
///
/// ```
/// use korra_node::protocol::{Message, MessageType};
/// use korra_node::transport::Connection;
///
/// # tokio_test_block_on(async {
/// let (a, b) = tokio::io::duplex(1024);
/// let mut left = Connection::new(a);
/// let mut right = Connection::new(b);
///
/// left.send(&Message::heartbeat()).await.unwrap();
/// let received = right.receive().await.unwrap();
/// assert_eq!(received.msg_type, MessageType::Heartbeat);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    connected: Arc<AtomicBool>,
    max_payload_size: u32,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected stream with the default payload limit.
    pub fn new(stream: S) -> Self {
        Self::with_max_payload(stream, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Wrap a connected stream, rejecting received payloads above `max_payload_size`.
    pub fn with_max_payload(stream: S, max_payload_size: u32) -> Self {
        Self {
            stream,
            connected: Arc::new(AtomicBool::new(true)),
            max_payload_size,
        }
    }

    /// Send one message.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        send_on(&mut self.stream, &self.connected, message).await
    }

    /// Receive one message, waiting as long as it takes.
    pub async fn receive(&mut self) -> Result<Message> {
        receive_on(
            &mut self.stream,
            &self.connected,
            self.max_payload_size,
            None,
        )
        .await
    }

    /// Receive one message, giving up if no frame starts within `timeout`.
    ///
    /// The deadline covers the wait for the first header byte. Once a frame
    /// has started arriving it is read to completion, so a timeout never
    /// leaves the stream mid-frame.
    pub async fn receive_timeout(&mut self, timeout: Duration) -> Result<Message> {
        receive_on(
            &mut self.stream,
            &self.connected,
            self.max_payload_size,
            Some(timeout),
        )
        .await
    }

    /// `false` once closed or broken by an I/O failure.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Largest payload accepted on receive.
    #[inline]
    pub fn max_payload_size(&self) -> u32 {
        self.max_payload_size
    }

    /// Shut down the write side and mark the connection closed.
    ///
    /// Safe to call more than once.
    pub async fn close(&mut self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.stream.shutdown().await {
                tracing::debug!("Stream shutdown failed: {}", e);
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Mutably borrow the underlying stream.
    ///
    /// Reading or writing through it bypasses framing.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Split into independently owned receive and send halves.
    ///
    /// Both halves share one connected flag: a failure on either side is
    /// visible to the other.
    pub fn into_split(self) -> (MessageReader<ReadHalf<S>>, MessageWriter<WriteHalf<S>>) {
        let (read_half, write_half) = tokio::io::split(self.stream);
        (
            MessageReader {
                reader: read_half,
                connected: self.connected.clone(),
                max_payload_size: self.max_payload_size,
            },
            MessageWriter {
                writer: write_half,
                connected: self.connected,
            },
        )
    }
}

impl Connection<TcpStream> {
    /// Address of the remote peer.
    pub fn peer_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }
}

/// Receive half of a split [`Connection`].
#[derive(Debug)]
pub struct MessageReader<R> {
    reader: R,
    connected: Arc<AtomicBool>,
    max_payload_size: u32,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// See [`Connection::receive`].
    pub async fn receive(&mut self) -> Result<Message> {
        receive_on(
            &mut self.reader,
            &self.connected,
            self.max_payload_size,
            None,
        )
        .await
    }

    /// See [`Connection::receive_timeout`].
    pub async fn receive_timeout(&mut self, timeout: Duration) -> Result<Message> {
        receive_on(
            &mut self.reader,
            &self.connected,
            self.max_payload_size,
            Some(timeout),
        )
        .await
    }

    /// `false` once closed or broken by an I/O failure.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// Send half of a split [`Connection`].
#[derive(Debug)]
pub struct MessageWriter<W> {
    writer: W,
    connected: Arc<AtomicBool>,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    /// See [`Connection::send`].
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        send_on(&mut self.writer, &self.connected, message).await
    }

    /// `false` once closed or broken by an I/O failure.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Shut down the write side and mark the connection closed.
    pub async fn close(&mut self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.writer.shutdown().await {
                tracing::debug!("Stream shutdown failed: {}", e);
            }
        }
    }
}

async fn send_on<W>(writer: &mut W, connected: &AtomicBool, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if !connected.load(Ordering::Acquire) {
        return Err(NodeError::NotConnected);
    }

    let result = write_message(writer, message).await;
    if let Err(ref e) = result {
        tracing::error!(msg_type = %message.msg_type, "Failed to send message: {}", e);
        if e.breaks_connection() {
            connected.store(false, Ordering::Release);
        }
    }
    result
}

async fn receive_on<R>(
    reader: &mut R,
    connected: &AtomicBool,
    max_payload_size: u32,
    timeout: Option<Duration>,
) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    if !connected.load(Ordering::Acquire) {
        return Err(NodeError::NotConnected);
    }

    let result = read_message(reader, max_payload_size, timeout).await;
    if let Err(ref e) = result {
        if e.breaks_connection() {
            connected.store(false, Ordering::Release);
        }
    }
    result
}

/// Write header then payload, each in full.
async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = message.header()?;
    writer.write_all(&header.encode()).await?;
    if !message.payload.is_empty() {
        writer.write_all(&message.payload).await?;
    }
    writer.flush().await?;

    tracing::debug!(
        msg_type = %message.msg_type,
        size = message.payload.len(),
        "Message sent"
    );
    Ok(())
}

/// Read one frame. See the module docs for the error mapping.
async fn read_message<R>(
    reader: &mut R,
    max_payload_size: u32,
    timeout: Option<Duration>,
) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];

    // `read` is cancel safe, so timing out here consumes nothing.
    let first = match timeout {
        Some(limit) => tokio::time::timeout(limit, reader.read(&mut header_buf))
            .await
            .map_err(|_| NodeError::Timeout(limit))??,
        None => reader.read(&mut header_buf).await?,
    };
    if first == 0 {
        tracing::debug!("Peer closed connection");
        return Err(NodeError::PeerClosed);
    }

    let filled = first + read_full(reader, &mut header_buf[first..]).await?;
    if filled < HEADER_SIZE {
        tracing::warn!(received = filled, "Connection lost inside frame header");
        return Err(NodeError::Truncated {
            expected: HEADER_SIZE,
            actual: filled,
        });
    }

    let header = match FrameHeader::parse(&header_buf) {
        Ok(header) => header,
        Err(e) => {
            tracing::warn!("Rejected frame header: {}", e);
            tracing::debug!("Header bytes:\n{}", hexdump(&header_buf));
            return Err(e);
        }
    };

    if header.payload_size > max_payload_size {
        tracing::warn!(
            size = header.payload_size,
            max = max_payload_size,
            "Payload exceeds limit"
        );
        return Err(NodeError::PayloadTooLarge {
            size: u64::from(header.payload_size),
            max: max_payload_size,
        });
    }

    let size = header.payload_size as usize;
    let mut payload = Vec::new();
    payload
        .try_reserve_exact(size)
        .map_err(|_| NodeError::AllocationFailed(size))?;
    payload.resize(size, 0);

    let received = read_full(reader, &mut payload).await?;
    if received < size {
        tracing::warn!(
            expected = size,
            received,
            "Connection lost inside payload"
        );
        return Err(NodeError::PeerClosed);
    }

    let msg_type = MessageType::try_from(header.msg_type)?;
    tracing::debug!(msg_type = %msg_type, size, "Message received");

    Ok(Message::new(msg_type, payload))
}

/// Fill `buf` unless EOF comes first. Returns the number of bytes read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
