//! Wire format encoding and decoding.
//!
//! Implements the 12-byte frame header:
//! ```text
//! ┌──────────┬─────────┬──────────┬──────────┬──────────────┐
//! │ Magic    │ Version │ Msg type │ Reserved │ Payload size │
//! │ 4 bytes  │ 1 byte  │ 1 byte   │ 2 bytes  │ 4 bytes      │
//! │ uint32 BE│         │          │ uint16 BE│ uint32 BE    │
//! └──────────┴─────────┴──────────┴──────────┴──────────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. The payload follows the header
//! immediately, with no padding and no checksum.

use crate::error::{NodeError, Result};

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// Magic number identifying KRRA frames ("KRRA").
pub const MAGIC: u32 = 0x4B52_5241;

/// Protocol revision spoken by this crate.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default maximum payload accepted on receive (16 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Must equal [`MAGIC`].
    pub magic: u32,
    /// Must equal [`PROTOCOL_VERSION`].
    pub version: u8,
    /// Raw message type code.
    pub msg_type: u8,
    /// Zero on write, ignored on read.
    pub reserved: u16,
    /// Payload length in bytes.
    pub payload_size: u32,
}

impl FrameHeader {
    /// Header for an outgoing message of this protocol revision.
    pub fn for_message(msg_type: u8, payload_size: u32) -> Self {
        Self {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            msg_type,
            reserved: 0,
            payload_size,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use korra_node::protocol::{FrameHeader, HEADER_SIZE};
    ///
    /// let bytes = FrameHeader::for_message(3, 10).encode();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// assert_eq!(&bytes[0..4], b"KRRA");
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (12 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4] = self.version;
        buf[5] = self.msg_type;
        buf[6..8].copy_from_slice(&self.reserved.to_be_bytes());
        buf[8..12].copy_from_slice(&self.payload_size.to_be_bytes());
    }

    /// Decode header fields from bytes without validating them.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            magic: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            version: buf[4],
            msg_type: buf[5],
            reserved: u16::from_be_bytes([buf[6], buf[7]]),
            payload_size: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Magic is checked before version. A header that fails here must not be
    /// used to size a payload read.
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(NodeError::BadMagic { found: self.magic });
        }

        if self.version != PROTOCOL_VERSION {
            return Err(NodeError::UnsupportedVersion {
                found: self.version,
            });
        }

        Ok(())
    }

    /// Decode and validate in one step.
    ///
    /// # Example
    ///
    /// ```
    /// use korra_node::protocol::FrameHeader;
    /// use korra_node::NodeError;
    ///
    /// let mut bytes = FrameHeader::for_message(0, 0).encode();
    /// bytes[0..4].copy_from_slice(&0u32.to_be_bytes());
    /// assert!(matches!(
    ///     FrameHeader::parse(&bytes),
    ///     Err(NodeError::BadMagic { found: 0 })
    /// ));
    /// ```
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let header = Self::decode(buf).ok_or(NodeError::Truncated {
            expected: HEADER_SIZE,
            actual: buf.len(),
        })?;
        header.validate()?;
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = FrameHeader::for_message(4, 100);
        let decoded = FrameHeader::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = FrameHeader {
            magic: MAGIC,
            version: 1,
            msg_type: 6,
            reserved: 0x0102,
            payload_size: 0x0A0B0C0D,
        };
        let bytes = header.encode();

        assert_eq!(&bytes[0..4], &[0x4B, 0x52, 0x52, 0x41]);
        assert_eq!(bytes[4], 1);
        assert_eq!(bytes[5], 6);
        assert_eq!(&bytes[6..8], &[0x01, 0x02]);
        assert_eq!(&bytes[8..12], &[0x0A, 0x0B, 0x0C, 0x0D]);
    }

    #[test]
    fn test_reserved_written_as_zero() {
        let bytes = FrameHeader::for_message(1, 5).encode();
        assert_eq!(&bytes[6..8], &[0, 0]);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; HEADER_SIZE - 1];
        assert!(FrameHeader::decode(&buf).is_none());
        assert!(matches!(
            FrameHeader::parse(&buf),
            Err(NodeError::Truncated {
                expected: HEADER_SIZE,
                actual: 11
            })
        ));
    }

    #[test]
    fn test_zero_magic_rejected() {
        let mut header = FrameHeader::for_message(0, 64);
        header.magic = 0;
        assert!(matches!(
            header.validate(),
            Err(NodeError::BadMagic { found: 0 })
        ));
    }

    #[test]
    fn test_version_two_rejected() {
        for payload_size in [0, 1, 4096, u32::MAX] {
            let mut header = FrameHeader::for_message(3, payload_size);
            header.version = 2;
            assert!(matches!(
                header.validate(),
                Err(NodeError::UnsupportedVersion { found: 2 })
            ));
        }
    }

    #[test]
    fn test_magic_checked_before_version() {
        let mut header = FrameHeader::for_message(0, 0);
        header.magic = 0xDEADBEEF;
        header.version = 9;
        assert!(matches!(
            header.validate(),
            Err(NodeError::BadMagic { found: 0xDEADBEEF })
        ));
    }

    #[test]
    fn test_reserved_ignored_on_read() {
        let mut bytes = FrameHeader::for_message(2, 7).encode();
        bytes[6] = 0xFF;
        bytes[7] = 0xEE;
        let header = FrameHeader::parse(&bytes).unwrap();
        assert_eq!(header.reserved, 0xFFEE);
        assert_eq!(header.payload_size, 7);
    }
}
