//! Pluggable body serialization.
//!
//! A call body is opaque bytes on the wire. The [`MessageCodec`] decides how a
//! structured message becomes those bytes. The blob field is stripped before the
//! codec ever sees the message (see [`crate::blob`]), so codecs only handle the
//! small structured part.
//!
//! # Example
//!
//! ```rust
//! use skein_core::{JsonCodec, MessageCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Lookup {
//!     path: String,
//! }
//!
//! let codec = JsonCodec;
//! let body = codec.encode(&Lookup { path: "name/echo".into() }).expect("encode");
//! let decoded: Lookup = codec.decode(&body).expect("decode");
//! assert_eq!(decoded.path, "name/echo");
//! ```

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a message to bytes.
    #[error("encode error: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a message.
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Body serialization format shared by both ends of a connection.
///
/// Codecs are cloned into every dispatch task, so they must be cheap to clone
/// and usable from any thread.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Encode a message body.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Bytes, CodecError>;

    /// Decode a message body.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if the bytes do not match `T`.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
///
/// Human-readable and handy for debugging. Large binary payloads should travel
/// in a blob field rather than through this codec.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Bytes, CodecError> {
        serde_json::to_vec(msg)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
    struct SpawnRequest {
        pid: u32,
        program: String,
    }

    #[test]
    fn test_json_codec_roundtrip() {
        let codec = JsonCodec;
        let msg = SpawnRequest {
            pid: 42,
            program: "spin-srv".to_string(),
        };

        let bytes = codec.encode(&msg).expect("encode should succeed");
        let decoded: SpawnRequest = codec.decode(&bytes).expect("decode should succeed");

        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_json_codec_decode_error() {
        let codec = JsonCodec;

        let result: Result<SpawnRequest, CodecError> = codec.decode(b"not valid json {");
        let err = result.expect_err("garbage must not decode");
        assert!(matches!(err, CodecError::Decode(_)));
        assert!(err.to_string().contains("decode error"));
    }

    #[test]
    fn test_json_codec_type_mismatch() {
        let codec = JsonCodec;
        let bytes = codec
            .encode(&SpawnRequest {
                pid: 1,
                program: "hello".to_string(),
            })
            .expect("encode should succeed");

        let result: Result<String, CodecError> = codec.decode(&bytes);
        assert!(result.is_err());
    }

    #[test]
    fn test_json_codec_empty_struct() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Empty {}

        let bytes = JsonCodec.encode(&Empty {}).expect("encode should succeed");
        assert_eq!(bytes.as_ref(), b"{}");
    }

    #[test]
    fn test_codec_error_display() {
        let encode_err = CodecError::Encode(Box::new(std::io::Error::other("boom")));
        assert_eq!(encode_err.to_string(), "encode error: boom");
    }
}
