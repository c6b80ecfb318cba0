//! Error types for the skein transport layer.

use skein_core::{CodecError, NamingError};

use crate::call::CallId;
use crate::wire::WireError;

/// Terminal failures of a transport.
///
/// Every variant means the connection is no longer usable. The type is
/// `Clone` because one failure is fanned out to every outstanding caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport was closed locally.
    #[error("transport closed")]
    Closed,

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Eof,

    /// I/O failure on the underlying connection.
    #[error("I/O error{}: {message}", on_call(.call_id))]
    Io {
        /// Call being written or read when the failure happened, if known.
        call_id: Option<CallId>,
        /// Description of the I/O error.
        message: String,
    },

    /// The peer sent bytes that do not form a valid frame.
    #[error("malformed frame: {0}")]
    Malformed(#[from] WireError),
}

impl TransportError {
    /// Wrap an I/O error, tagging it with the call id when known.
    pub fn io(call_id: Option<CallId>, err: &std::io::Error) -> Self {
        TransportError::Io {
            call_id,
            message: err.to_string(),
        }
    }

    /// Call id the failure is attributed to, if any.
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            TransportError::Io { call_id, .. } => *call_id,
            _ => None,
        }
    }
}

fn on_call(call_id: &Option<CallId>) -> String {
    call_id.map(|id| format!(" on call {id}")).unwrap_or_default()
}

/// Errors raised by the messaging layer outside of a reply.
///
/// These cover server configuration, send-side failures and bookkeeping
/// faults. Remote failures arrive as [`ReplyError`](crate::ReplyError).
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// An endpoint is already registered for the method selector.
    #[error("duplicate endpoint: {method}")]
    DuplicateEndpoint {
        /// The contested selector.
        method: String,
    },

    /// Failed to serialize an outgoing message.
    #[error("serialization failed: {0}")]
    Serialization(#[from] CodecError),

    /// The transport failed or is closed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The call map refused the call.
    #[error("call map error: {0}")]
    CallMap(#[from] crate::rpc::CallMapError),

    /// Publishing or withdrawing the server address failed.
    #[error("naming error: {0}")]
    Naming(#[from] NamingError),
}
