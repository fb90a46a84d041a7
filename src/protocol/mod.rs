//! Protocol module - wire format, messages, and payload bodies.
//!
//! This module implements the KRRA binary protocol:
//! - 12-byte header encoding/decoding and validation
//! - Message type codes and whole-frame encode/decode
//! - Typed MsgPack bodies for the defined message types

mod message;
mod payload;
mod wire_format;

pub use message::{Message, MessageType};
pub use payload::{
    AgentRegistration, AgentStatus, AgentUpdate, ErrorReport, JobResult, JobSubmit, NodeInfo,
};
pub use wire_format::{
    FrameHeader, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, MAGIC, PROTOCOL_VERSION,
};
