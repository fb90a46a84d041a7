//! Typed messages and whole-frame encoding.
//!
//! A [`Message`] is a message type plus an opaque payload. The wire length is
//! always the payload length, so the two can never disagree.
//!
//! # Example
//!
//! ```
//! use korra_node::protocol::{Message, MessageType};
//!
//! let message = Message::new(MessageType::JobSubmit, &b"0123456789"[..]);
//! let bytes = message.encode().unwrap();
//! assert_eq!(bytes.len(), 12 + 10);
//!
//! let decoded = Message::decode(&bytes).unwrap();
//! assert_eq!(decoded, message);
//! ```

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::wire_format::{FrameHeader, HEADER_SIZE};
use crate::codec::MsgPackCodec;
use crate::error::{NodeError, Result};

/// Message type codes carried in the header's `msg_type` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Heartbeat = 0,
    AgentRegister = 1,
    AgentUpdate = 2,
    JobSubmit = 3,
    JobResult = 4,
    StateSync = 5,
    NodeInfo = 6,
    Error = 255,
}

impl MessageType {
    /// Wire code for this type.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Short lowercase name, used for task labels and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Heartbeat => "heartbeat",
            MessageType::AgentRegister => "agent_register",
            MessageType::AgentUpdate => "agent_update",
            MessageType::JobSubmit => "job_submit",
            MessageType::JobResult => "job_result",
            MessageType::StateSync => "state_sync",
            MessageType::NodeInfo => "node_info",
            MessageType::Error => "error",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = NodeError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(MessageType::Heartbeat),
            1 => Ok(MessageType::AgentRegister),
            2 => Ok(MessageType::AgentUpdate),
            3 => Ok(MessageType::JobSubmit),
            4 => Ok(MessageType::JobResult),
            5 => Ok(MessageType::StateSync),
            6 => Ok(MessageType::NodeInfo),
            255 => Ok(MessageType::Error),
            other => Err(NodeError::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type.
    pub msg_type: MessageType,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Message {
    /// Create a message from a type and payload.
    pub fn new(msg_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_type,
            payload: payload.into(),
        }
    }

    /// Create a message with an empty payload.
    pub fn empty(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            payload: Bytes::new(),
        }
    }

    /// Empty heartbeat.
    pub fn heartbeat() -> Self {
        Self::empty(MessageType::Heartbeat)
    }

    /// Create a message whose payload is a MsgPack-encoded body.
    pub fn with_body<T: Serialize>(msg_type: MessageType, body: &T) -> Result<Self> {
        let data = MsgPackCodec::encode(body)?;
        Ok(Self::new(msg_type, data))
    }

    /// Decode the payload as a MsgPack body.
    pub fn body<T: DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::decode(&self.payload)
    }

    /// Payload length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True when the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Build the header for this message.
    ///
    /// Fails if the payload does not fit the 32-bit size field.
    pub fn header(&self) -> Result<FrameHeader> {
        let size = u32::try_from(self.payload.len()).map_err(|_| NodeError::PayloadTooLarge {
            size: self.payload.len() as u64,
            max: u32::MAX,
        })?;
        Ok(FrameHeader::for_message(self.msg_type.code(), size))
    }

    /// Encode header followed by payload into one contiguous buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let header = self.header()?;
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Decode one frame from the start of `buf`.
    ///
    /// The header is validated before the payload length is trusted. Bytes
    /// past the end of the frame are not consumed.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = FrameHeader::parse(buf)?;
        let expected = HEADER_SIZE + header.payload_size as usize;
        if buf.len() < expected {
            return Err(NodeError::Truncated {
                expected,
                actual: buf.len(),
            });
        }

        let msg_type = MessageType::try_from(header.msg_type)?;
        Ok(Self::new(
            msg_type,
            Bytes::copy_from_slice(&buf[HEADER_SIZE..expected]),
        ))
    }
}
