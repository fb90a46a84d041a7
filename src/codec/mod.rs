//! Codec module - serialization for typed payload bodies.
//!
//! The wire codec in [`protocol`](crate::protocol) never looks inside a
//! payload. When both ends agree on a body type, [`MsgPackCodec`] encodes it.
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the choice is made at compile time.

mod msgpack;

pub use msgpack::MsgPackCodec;
