//! Error types for request-response operations.
//!
//! A call can fail on the remote side, in which case the server answers with
//! an error descriptor that decodes into one of:
//! - No endpoint for the selector ([`ReplyError::UnknownMethod`])
//! - Request body rejected ([`ReplyError::InvalidRequest`])
//! - Handler returned an error or panicked ([`ReplyError::Handler`],
//!   [`ReplyError::HandlerPanicked`])
//!
//! or locally, while waiting for or decoding the reply
//! ([`ReplyError::ConnectionFailed`], [`ReplyError::Timeout`],
//! [`ReplyError::Serialization`]).

use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::wire::{ErrorDescriptor, ErrorKind};

/// Errors a caller can observe for one call.
///
/// These errors are serializable so they can be logged or forwarded as
/// structured data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyError {
    /// The server has no endpoint for the method selector.
    UnknownMethod {
        /// The selector that was called.
        method: String,
    },

    /// The server could not decode the request body.
    InvalidRequest {
        /// Decoder message.
        message: String,
    },

    /// The handler returned an error.
    Handler {
        /// Message from the handler.
        message: String,
    },

    /// Serialization or deserialization failed on either side.
    Serialization {
        /// Human-readable error message.
        message: String,
    },

    /// The handler panicked.
    ///
    /// The server stays up; only this call failed.
    HandlerPanicked {
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The connection failed or was closed before the reply arrived.
    ///
    /// The request may or may not have been delivered to the server.
    ConnectionFailed {
        /// What ended the connection.
        reason: String,
    },

    /// No reply arrived within the call timeout.
    ///
    /// The server may still be processing the request.
    Timeout,

    /// The server reported a failure kind this build does not know.
    Unknown {
        /// Message from the server.
        message: String,
    },
}

impl ReplyError {
    /// Descriptor sent in an error response for this failure.
    pub fn to_descriptor(&self) -> ErrorDescriptor {
        match self {
            ReplyError::UnknownMethod { method } => {
                ErrorDescriptor::new(ErrorKind::UnknownMethod, method.clone())
            }
            ReplyError::InvalidRequest { message } => {
                ErrorDescriptor::new(ErrorKind::InvalidRequest, message.clone())
            }
            ReplyError::Handler { message } => {
                ErrorDescriptor::new(ErrorKind::Handler, message.clone())
            }
            ReplyError::Serialization { message } => {
                ErrorDescriptor::new(ErrorKind::Serialization, message.clone())
            }
            ReplyError::HandlerPanicked { message } => {
                ErrorDescriptor::new(ErrorKind::HandlerPanicked, message.clone())
            }
            ReplyError::Timeout => ErrorDescriptor::new(ErrorKind::Timeout, ""),
            ReplyError::ConnectionFailed { reason } => {
                ErrorDescriptor::new(ErrorKind::Unknown, reason.clone())
            }
            ReplyError::Unknown { message } => {
                ErrorDescriptor::new(ErrorKind::Unknown, message.clone())
            }
        }
    }
}

impl From<ErrorDescriptor> for ReplyError {
    fn from(descriptor: ErrorDescriptor) -> Self {
        let ErrorDescriptor { kind, message } = descriptor;
        match kind {
            ErrorKind::UnknownMethod => ReplyError::UnknownMethod { method: message },
            ErrorKind::InvalidRequest => ReplyError::InvalidRequest { message },
            ErrorKind::Handler => ReplyError::Handler { message },
            ErrorKind::Serialization => ReplyError::Serialization { message },
            ErrorKind::HandlerPanicked => ReplyError::HandlerPanicked { message },
            ErrorKind::Timeout => ReplyError::Timeout,
            ErrorKind::Unknown => ReplyError::Unknown { message },
        }
    }
}

impl From<TransportError> for ReplyError {
    fn from(err: TransportError) -> Self {
        ReplyError::ConnectionFailed {
            reason: err.to_string(),
        }
    }
}

impl std::fmt::Display for ReplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyError::UnknownMethod { method } => write!(f, "unknown method: {}", method),
            ReplyError::InvalidRequest { message } => write!(f, "invalid request: {}", message),
            ReplyError::Handler { message } => write!(f, "handler error: {}", message),
            ReplyError::Serialization { message } => write!(f, "serialization error: {}", message),
            ReplyError::HandlerPanicked { message } => write!(f, "handler panicked: {}", message),
            ReplyError::ConnectionFailed { reason } => write!(f, "connection failed: {}", reason),
            ReplyError::Timeout => write!(f, "request timed out"),
            ReplyError::Unknown { message } => write!(f, "remote error: {}", message),
        }
    }
}

impl std::error::Error for ReplyError {}
