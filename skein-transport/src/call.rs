//! The unit of exchange on a connection.

use std::fmt;

use bytes::Bytes;

/// Correlation identifier of a call.
///
/// Assigned by the sender, unique among the calls outstanding on one
/// connection. A response reuses the id of its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a call travels towards a handler or back to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    /// Caller to handler.
    Request = 0,
    /// Handler back to caller.
    Response = 1,
}

impl TryFrom<u8> for Direction {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Direction::Request),
            1 => Ok(Direction::Response),
            other => Err(other),
        }
    }
}

/// Outcome tag carried by every call.
///
/// Requests and successful responses use [`Status::Success`]. An error response
/// carries an error descriptor in its body instead of a typed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Request, or successful response.
    Success = 0,
    /// Error response; the body is an error descriptor.
    Failure = 1,
}

/// Any non-zero byte marks an error response; `Failure` is written as 1.
impl From<u8> for Status {
    fn from(value: u8) -> Self {
        match value {
            0 => Status::Success,
            _ => Status::Failure,
        }
    }
}

/// One framed request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Correlation identifier.
    pub id: CallId,
    /// Target endpoint selector, e.g. `"EchoSrv.Echo"`.
    pub method: String,
    /// Request or response.
    pub direction: Direction,
    /// Success or failure. Requests always carry `Success`.
    pub status: Status,
    /// Encoded message body with the blob field stripped.
    pub body: Bytes,
    /// Blob buffers in order. May be empty.
    pub blobs: Vec<Bytes>,
}

impl Call {
    /// Build a request call.
    pub fn request(id: CallId, method: impl Into<String>, body: Bytes, blobs: Vec<Bytes>) -> Self {
        Self {
            id,
            method: method.into(),
            direction: Direction::Request,
            status: Status::Success,
            body,
            blobs,
        }
    }

    /// Build a successful response to `request`.
    pub fn response(request: &Call, body: Bytes, blobs: Vec<Bytes>) -> Self {
        Self {
            id: request.id,
            method: request.method.clone(),
            direction: Direction::Response,
            status: Status::Success,
            body,
            blobs,
        }
    }

    /// Build an error response to `request` carrying an encoded descriptor.
    pub fn error_response(request: &Call, descriptor: Bytes) -> Self {
        Self {
            id: request.id,
            method: request.method.clone(),
            direction: Direction::Response,
            status: Status::Failure,
            body: descriptor,
            blobs: Vec::new(),
        }
    }

    /// True for request calls.
    pub fn is_request(&self) -> bool {
        self.direction == Direction::Request
    }

    /// True for error responses.
    pub fn is_error(&self) -> bool {
        self.status == Status::Failure
    }

    /// Total blob payload size.
    pub fn blob_bytes(&self) -> usize {
        self.blobs.iter().map(Bytes::len).sum()
    }
}
