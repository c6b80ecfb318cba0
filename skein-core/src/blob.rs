//! Blob side-channel for large binary payloads.
//!
//! Structured messages go through a general-purpose [`MessageCodec`], which is a
//! poor fit for megabytes of raw bytes (extra copy, extra encoding). A message
//! type can instead carry its payload in a [`Blob`] field. Before encoding, the
//! transport pulls the buffers out with [`extract_blob`] and writes them as raw
//! frames; after decoding, [`inject_blob`] puts them back.
//!
//! A message type opts in by overriding [`RpcMessage::blob`]. Types that keep
//! the default have no blob field, and both operations are no-ops for them.
//!
//! ```rust
//! use bytes::Bytes;
//! use serde::{Deserialize, Serialize};
//! use skein_core::{Blob, RpcMessage, extract_blob, inject_blob};
//!
//! #[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
//! struct WriteRequest {
//!     path: String,
//!     blob: Blob,
//! }
//!
//! impl RpcMessage for WriteRequest {
//!     fn blob(&mut self) -> Option<&mut Blob> {
//!         Some(&mut self.blob)
//!     }
//! }
//!
//! let mut req = WriteRequest {
//!     path: "name/data".into(),
//!     blob: Blob::from(vec![Bytes::from_static(b"abc")]),
//! };
//! let original = WriteRequest { path: req.path.clone(), blob: req.blob.clone() };
//!
//! let bufs = extract_blob(&mut req);
//! assert_eq!(bufs.len(), 1);
//! assert!(req.blob.is_empty());
//!
//! inject_blob(&mut req, bufs);
//! assert_eq!(req, original);
//! ```
//!
//! [`MessageCodec`]: crate::MessageCodec

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Ordered list of raw buffers carried next to a structured message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    /// Buffers in transmission order.
    pub iov: Vec<Bytes>,
}

impl Blob {
    /// Create an empty (but present) blob.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffers.
    pub fn len(&self) -> usize {
        self.iov.len()
    }

    /// True when the blob holds no buffers.
    pub fn is_empty(&self) -> bool {
        self.iov.is_empty()
    }

    /// Total payload size across all buffers.
    pub fn total_bytes(&self) -> usize {
        self.iov.iter().map(Bytes::len).sum()
    }
}

impl From<Vec<Bytes>> for Blob {
    fn from(iov: Vec<Bytes>) -> Self {
        Self { iov }
    }
}

/// A structured message that can travel as a call body.
///
/// The default implementation declares no blob field. Message types with a
/// large binary payload override [`blob`](Self::blob) to expose it.
pub trait RpcMessage: Serialize + DeserializeOwned + Send + 'static {
    /// Access the blob field, or `None` if this type has none.
    fn blob(&mut self) -> Option<&mut Blob> {
        None
    }
}

impl RpcMessage for () {}
impl RpcMessage for String {}
impl RpcMessage for u64 {}

/// Whether the message type declares a blob field.
pub fn has_blob_field<M: RpcMessage>(msg: &mut M) -> bool {
    msg.blob().is_some()
}

/// Move the blob buffers out of `msg`.
///
/// The field is left present but empty, so encoding the stripped message
/// carries no payload bytes. Returns an empty list when the type has no blob
/// field.
pub fn extract_blob<M: RpcMessage>(msg: &mut M) -> Vec<Bytes> {
    match msg.blob() {
        Some(blob) => std::mem::take(&mut blob.iov),
        None => Vec::new(),
    }
}

/// Put blob buffers back into a decoded message.
///
/// Buffers are dropped silently when the type has no blob field; a peer that
/// sends blobs for such a type has nowhere to put them.
pub fn inject_blob<M: RpcMessage>(msg: &mut M, iov: Vec<Bytes>) {
    if let Some(blob) = msg.blob() {
        blob.iov = iov;
    } else if !iov.is_empty() {
        tracing::debug!(
            buffers = iov.len(),
            "discarding blob buffers for message without blob field"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JsonCodec, MessageCodec};

    #[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
    struct ReadReply {
        offset: u64,
        blob: Blob,
    }

    impl RpcMessage for ReadReply {
        fn blob(&mut self) -> Option<&mut Blob> {
            Some(&mut self.blob)
        }
    }

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    struct StatRequest {
        path: String,
    }

    impl RpcMessage for StatRequest {}

    fn three_buffers() -> Vec<Bytes> {
        vec![
            Bytes::from_static(b"first"),
            Bytes::new(),
            Bytes::from(vec![7u8; 4096]),
        ]
    }

    #[test]
    fn test_extract_then_inject_restores_message() {
        let original = ReadReply {
            offset: 512,
            blob: Blob::from(three_buffers()),
        };
        let mut msg = original.clone();

        let bufs = extract_blob(&mut msg);
        assert_eq!(bufs, three_buffers());
        assert!(msg.blob.is_empty());

        let body = JsonCodec.encode(&msg).expect("encode stripped body");
        let mut decoded: ReadReply = JsonCodec.decode(&body).expect("decode stripped body");
        inject_blob(&mut decoded, bufs);

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_stripped_body_carries_no_payload() {
        let mut msg = ReadReply {
            offset: 0,
            blob: Blob::from(vec![Bytes::from(vec![0xAB; 64 * 1024])]),
        };
        extract_blob(&mut msg);

        let body = JsonCodec.encode(&msg).expect("encode");
        assert!(body.len() < 64);
    }

    #[test]
    fn test_no_blob_field_is_noop() {
        let mut msg = StatRequest {
            path: "name/ux".to_string(),
        };

        assert!(!has_blob_field(&mut msg));
        assert!(extract_blob(&mut msg).is_empty());

        inject_blob(&mut msg, vec![Bytes::from_static(b"ignored")]);
        assert_eq!(msg.path, "name/ux");
    }

    #[test]
    fn test_present_but_empty_blob_round_trips_empty() {
        let mut msg = ReadReply::default();

        assert!(has_blob_field(&mut msg));
        let bufs = extract_blob(&mut msg);
        assert!(bufs.is_empty());

        inject_blob(&mut msg, bufs);
        assert_eq!(msg.blob, Blob::new());
        assert!(has_blob_field(&mut msg));
    }

    #[test]
    fn test_blob_sizes() {
        let blob = Blob::from(three_buffers());
        assert_eq!(blob.len(), 3);
        assert_eq!(blob.total_bytes(), 5 + 4096);
    }
}
