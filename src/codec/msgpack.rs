//! MsgPack codec using `rmp-serde`.
//!
//! Structs are always written with `to_vec_named` so bodies are maps keyed by
//! field name. Nodes built from different revisions can then add optional
//! fields without breaking positional decoding on older peers.
//!
//! # Example
//!
//! ```
//! use korra_node::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Job {
//!     id: u32,
//!     agent: String,
//! }
//!
//! let job = Job { id: 42, agent: "analyzer".to_string() };
//! let encoded = MsgPackCodec::encode(&job).unwrap();
//! let decoded: Job = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, job);
//! ```

use crate::error::Result;

/// MessagePack codec for typed payload bodies.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Registration {
        agent_id: String,
        agent_type: String,
        replicas: u32,
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct RegistrationV2 {
        agent_id: String,
        agent_type: String,
        replicas: u32,
        #[serde(default)]
        region: Option<String>,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = Registration {
            agent_id: "a-1".to_string(),
            agent_type: "analyzer".to_string(),
            replicas: 2,
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: Registration = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_struct_written_as_map() {
        let encoded = MsgPackCodec::encode(&Registration {
            agent_id: "x".to_string(),
            agent_type: "y".to_string(),
            replicas: 0,
        })
        .unwrap();

        // fixmap with 3 entries, not fixarray (0x93)
        assert_eq!(encoded[0], 0x83);
    }

    #[test]
    fn test_newer_reader_accepts_older_body() {
        let encoded = MsgPackCodec::encode(&Registration {
            agent_id: "a-2".to_string(),
            agent_type: "validator".to_string(),
            replicas: 1,
        })
        .unwrap();

        let decoded: RegistrationV2 = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.agent_id, "a-2");
        assert_eq!(decoded.region, None);
    }

    #[test]
    fn test_binary_field_uses_bin_format() {
        let data: Vec<u8> = vec![0x01, 0x02, 0x03];
        let encoded = MsgPackCodec::encode(&serde_bytes::Bytes::new(&data)).unwrap();

        // bin8
        assert_eq!(encoded[0], 0xc4);

        let decoded: serde_bytes::ByteBuf = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.as_ref(), &data);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Registration> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(result.is_err());
    }
}
