//! Error types for korra-node.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// I/O error during socket, thread or file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (configuration).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error (typed payload bodies).
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error (typed payload bodies).
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Frame header carried the wrong magic number.
    #[error("Bad magic: 0x{found:08X}")]
    BadMagic { found: u32 },

    /// Frame header carried a protocol version we do not speak.
    #[error("Unsupported protocol version: {found}")]
    UnsupportedVersion { found: u8 },

    /// Message type code is not defined by the protocol.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Payload exceeds the configured or wire maximum.
    #[error("Payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: u64, max: u32 },

    /// Fewer bytes were available than the frame requires.
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Payload buffer could not be allocated.
    #[error("Failed to allocate {0} bytes for payload")]
    AllocationFailed(usize),

    /// Peer performed an orderly close.
    #[error("Connection closed by peer")]
    PeerClosed,

    /// Operation requires a connected transport.
    #[error("Not connected")]
    NotConnected,

    /// Operation requires the server role.
    #[error("Transport is not a server")]
    NotServer,

    /// Submit rejected because the pool is shutting down.
    #[error("Worker pool is shutting down")]
    PoolShutdown,

    /// Non-blocking submit rejected because the queue is full.
    #[error("Work queue is full")]
    QueueFull,

    /// Deadline elapsed before the operation completed.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Agent engine failure.
    #[error("Agent error: {0}")]
    Agent(String),

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl NodeError {
    /// True when the peer closed the connection in an orderly way.
    #[inline]
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, NodeError::PeerClosed)
    }

    /// True when the byte stream can no longer be trusted to be frame-aligned
    /// and the connection must be treated as lost.
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self,
            NodeError::Io(_) | NodeError::PeerClosed | NodeError::Truncated { .. }
        )
    }
}

/// Result type alias using NodeError.
pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_magic_display_is_hex() {
        let err = NodeError::BadMagic { found: 0xDEADBEEF };
        assert_eq!(err.to_string(), "Bad magic: 0xDEADBEEF");
    }

    #[test]
    fn test_classification() {
        assert!(NodeError::PeerClosed.is_peer_closed());
        assert!(NodeError::PeerClosed.breaks_connection());
        assert!(NodeError::Truncated {
            expected: 12,
            actual: 3
        }
        .breaks_connection());
        assert!(!NodeError::BadMagic { found: 0 }.breaks_connection());
        assert!(!NodeError::UnknownMessageType(9).is_peer_closed());
    }
}
