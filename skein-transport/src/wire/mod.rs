//! Wire format for call frames.
//!
//! Frame format (all integers little-endian):
//!
//! ```text
//! [call_id:8][direction:1][method_len:4][method:N][status:1][body_len:4][body:N]
//! [blob_count:4]{[blob_len:4][blob:N]}*
//! ```
//!
//! - **direction**: 0 request, 1 response
//! - **status**: 0 success, 1 error (body is then an [`ErrorDescriptor`])
//! - **blobs**: raw buffers written after the body, never re-encoded
//!
//! There is no outer length prefix: the reader walks the declared lengths and
//! knows the frame is complete once the last blob has arrived.

use std::ops::Range;

use bytes::{BufMut, Bytes, BytesMut};

use crate::call::{Call, CallId, Direction, Status};

/// Bytes before the method name: call id + direction + method length.
pub const PREFIX_SIZE: usize = 8 + 1 + 4;

/// Smallest possible frame: empty method, empty body, no blobs.
pub const MIN_FRAME_SIZE: usize = PREFIX_SIZE + 1 + 4 + 4;

/// Longest accepted method selector.
pub const MAX_METHOD_LEN: usize = 1024;

/// Default ceiling on a whole frame (64MB).
///
/// Frames larger than the configured ceiling are rejected before their
/// payload is buffered.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Direction byte is neither request nor response.
    #[error("invalid direction tag: {0}")]
    InvalidDirection(u8),

    /// Method selector is too long or not UTF-8.
    #[error("invalid method selector: {reason}")]
    InvalidMethod {
        /// What was wrong with it.
        reason: String,
    },

    /// Frame exceeds the configured ceiling.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared or actual frame size.
        size: usize,
        /// Configured ceiling.
        max: usize,
    },

    /// Error descriptor body could not be parsed.
    #[error("invalid error descriptor: {reason}")]
    InvalidDescriptor {
        /// What was wrong with it.
        reason: String,
    },
}

/// Category of a remote failure, sent as the first byte of an error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorKind {
    /// No endpoint is registered for the method selector.
    UnknownMethod = 1,
    /// The request body did not match the endpoint's request type.
    InvalidRequest = 2,
    /// The handler reported a failure.
    Handler = 3,
    /// The handler's response could not be encoded.
    Serialization = 4,
    /// The handler panicked before producing a response.
    HandlerPanicked = 5,
    /// The remote side gave up waiting.
    Timeout = 6,
    /// A tag this build does not know.
    Unknown = 255,
}

impl From<u8> for ErrorKind {
    fn from(value: u8) -> Self {
        match value {
            1 => ErrorKind::UnknownMethod,
            2 => ErrorKind::InvalidRequest,
            3 => ErrorKind::Handler,
            4 => ErrorKind::Serialization,
            5 => ErrorKind::HandlerPanicked,
            6 => ErrorKind::Timeout,
            _ => ErrorKind::Unknown,
        }
    }
}

/// Error kind plus human-readable message, carried in an error response body.
///
/// Layout: `[kind:1][message:UTF-8 remainder]`. Independent of the body
/// codec so either side can decode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDescriptor {
    /// Failure category.
    pub kind: ErrorKind,
    /// Description for logs and callers.
    pub message: String,
}

impl ErrorDescriptor {
    /// Create a descriptor.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Encode into an error response body.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.message.len());
        buf.put_u8(self.kind as u8);
        buf.put_slice(self.message.as_bytes());
        buf.freeze()
    }

    /// Decode an error response body.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDescriptor` for an empty body or a non-UTF-8 message.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let (&kind, message) = body.split_first().ok_or_else(|| WireError::InvalidDescriptor {
            reason: "empty body".to_string(),
        })?;
        let message = std::str::from_utf8(message).map_err(|e| WireError::InvalidDescriptor {
            reason: e.to_string(),
        })?;
        Ok(Self::new(ErrorKind::from(kind), message))
    }
}

/// Encode a call into the segments written on the wire, in order.
///
/// Blob buffers are returned as-is (no copy); only the fixed fields, the
/// method and the body are packed into the first segment. The per-blob length
/// prefixes get their own small segments.
///
/// # Errors
///
/// Returns `InvalidMethod` for an over-long selector and `FrameTooLarge` if
/// the encoded frame would exceed `max_frame_size`.
pub fn encode_segments(call: &Call, max_frame_size: usize) -> Result<Vec<Bytes>, WireError> {
    let method = call.method.as_bytes();
    if method.len() > MAX_METHOD_LEN {
        return Err(WireError::InvalidMethod {
            reason: format!("{} bytes (max {MAX_METHOD_LEN})", method.len()),
        });
    }

    let size = frame_size(call);
    if size > max_frame_size {
        return Err(WireError::FrameTooLarge {
            size,
            max: max_frame_size,
        });
    }

    let mut head = BytesMut::with_capacity(MIN_FRAME_SIZE + method.len() + call.body.len());
    head.put_u64_le(call.id.0);
    head.put_u8(call.direction as u8);
    head.put_u32_le(method.len() as u32);
    head.put_slice(method);
    head.put_u8(call.status as u8);
    head.put_u32_le(call.body.len() as u32);
    head.put_slice(&call.body);
    head.put_u32_le(call.blobs.len() as u32);

    let mut segments = Vec::with_capacity(1 + 2 * call.blobs.len());
    segments.push(head.freeze());
    for blob in &call.blobs {
        segments.push(Bytes::copy_from_slice(&(blob.len() as u32).to_le_bytes()));
        segments.push(blob.clone());
    }
    Ok(segments)
}

/// Encode a call into one contiguous frame.
///
/// # Errors
///
/// Same as [`encode_segments`].
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use skein_transport::{Call, CallId, DEFAULT_MAX_FRAME_SIZE, decode_frame, encode_frame};
///
/// let call = Call::request(CallId(1), "EchoSrv.Echo", Bytes::from_static(b"{}"), vec![]);
/// let frame = encode_frame(&call, DEFAULT_MAX_FRAME_SIZE).expect("encode");
/// let (decoded, consumed) = decode_frame(&frame, DEFAULT_MAX_FRAME_SIZE)
///     .expect("decode")
///     .expect("complete frame");
///
/// assert_eq!(decoded, call);
/// assert_eq!(consumed, frame.len());
/// ```
pub fn encode_frame(call: &Call, max_frame_size: usize) -> Result<Bytes, WireError> {
    let segments = encode_segments(call, max_frame_size)?;
    let mut out = BytesMut::with_capacity(frame_size(call));
    for segment in segments {
        out.put_slice(&segment);
    }
    Ok(out.freeze())
}

/// Encoded size of a call.
pub fn frame_size(call: &Call) -> usize {
    MIN_FRAME_SIZE
        + call.method.len()
        + call.body.len()
        + call.blobs.iter().map(|b| 4 + b.len()).sum::<usize>()
}

/// Read-only walker over a possibly partial frame.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Option<u64> {
        self.take(8).map(|b| {
            u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }
}

/// Try to decode one frame from the front of `data`.
///
/// # Returns
///
/// - `Ok(Some((call, consumed)))` if a complete frame was parsed
/// - `Ok(None)` if more data is needed (not an error condition)
/// - `Err` if the frame is malformed or too large
///
/// Declared lengths are checked against `max_frame_size` as soon as they are
/// read, so an oversized frame is rejected before its payload arrives.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use skein_transport::{Call, CallId, DEFAULT_MAX_FRAME_SIZE, decode_frame, encode_frame};
///
/// let call = Call::request(CallId(3), "A.B", Bytes::from_static(b"body"), vec![]);
/// let frame = encode_frame(&call, DEFAULT_MAX_FRAME_SIZE).expect("encode");
///
/// // Partial data returns None
/// assert!(decode_frame(&frame[..10], DEFAULT_MAX_FRAME_SIZE).expect("partial").is_none());
/// ```
pub fn decode_frame(data: &[u8], max_frame_size: usize) -> Result<Option<(Call, usize)>, WireError> {
    let Some(frame) = parse_frame(data, max_frame_size)? else {
        return Ok(None);
    };
    let call = Call {
        id: frame.id,
        method: frame.method,
        direction: frame.direction,
        status: frame.status,
        body: Bytes::copy_from_slice(&data[frame.body]),
        blobs: frame
            .blobs
            .into_iter()
            .map(|r| Bytes::copy_from_slice(&data[r]))
            .collect(),
    };
    Ok(Some((call, frame.consumed)))
}

/// Decode one frame from the front of a read buffer, consuming it.
///
/// Zero-copy variant of [`decode_frame`] for the transport's accumulation
/// buffer: body and blobs are sliced out of the split-off frame and share
/// its allocation.
///
/// # Errors
///
/// Same as [`decode_frame`]. On error the buffer is left untouched.
pub fn take_frame(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<Call>, WireError> {
    let Some(frame) = parse_frame(buf, max_frame_size)? else {
        return Ok(None);
    };
    let bytes = buf.split_to(frame.consumed).freeze();
    Ok(Some(Call {
        id: frame.id,
        method: frame.method,
        direction: frame.direction,
        status: frame.status,
        body: bytes.slice(frame.body),
        blobs: frame.blobs.into_iter().map(|r| bytes.slice(r)).collect(),
    }))
}

/// Header fields of a complete frame plus the byte ranges of its payloads.
struct ParsedFrame {
    id: CallId,
    method: String,
    direction: Direction,
    status: Status,
    body: Range<usize>,
    blobs: Vec<Range<usize>>,
    consumed: usize,
}

fn parse_frame(data: &[u8], max_frame_size: usize) -> Result<Option<ParsedFrame>, WireError> {
    let mut cur = Cursor { buf: data, pos: 0 };

    let too_large = |size: usize| WireError::FrameTooLarge {
        size,
        max: max_frame_size,
    };

    let Some(id) = cur.u64() else { return Ok(None) };
    let Some(direction) = cur.u8() else { return Ok(None) };
    let direction = Direction::try_from(direction).map_err(WireError::InvalidDirection)?;

    let Some(method_len) = cur.u32() else { return Ok(None) };
    let method_len = method_len as usize;
    if method_len > MAX_METHOD_LEN {
        return Err(WireError::InvalidMethod {
            reason: format!("{method_len} bytes (max {MAX_METHOD_LEN})"),
        });
    }
    let Some(method) = cur.take(method_len) else { return Ok(None) };

    let Some(status) = cur.u8() else { return Ok(None) };
    let status = Status::from(status);

    let Some(body_len) = cur.u32() else { return Ok(None) };
    let declared = cur.pos + body_len as usize + 4;
    if declared > max_frame_size {
        return Err(too_large(declared));
    }
    let body_start = cur.pos;
    if cur.take(body_len as usize).is_none() {
        return Ok(None);
    }
    let body = body_start..cur.pos;

    let Some(blob_count) = cur.u32() else { return Ok(None) };
    // Each blob needs at least its 4-byte length prefix.
    let declared = cur.pos + 4 * blob_count as usize;
    if declared > max_frame_size {
        return Err(too_large(declared));
    }

    // The count is untrusted until the prefixes arrive; reserve only what is buffered.
    let buffered = (data.len() - cur.pos) / 4;
    let mut blobs = Vec::with_capacity((blob_count as usize).min(buffered));
    for _ in 0..blob_count {
        let Some(len) = cur.u32() else { return Ok(None) };
        let declared = cur.pos + len as usize;
        if declared > max_frame_size {
            return Err(too_large(declared));
        }
        let start = cur.pos;
        if cur.take(len as usize).is_none() {
            return Ok(None);
        }
        blobs.push(start..cur.pos);
    }

    let method = std::str::from_utf8(method)
        .map_err(|e| WireError::InvalidMethod {
            reason: e.to_string(),
        })?
        .to_string();

    Ok(Some(ParsedFrame {
        id: CallId(id),
        method,
        direction,
        status,
        body,
        blobs,
        consumed: cur.pos,
    }))
}
