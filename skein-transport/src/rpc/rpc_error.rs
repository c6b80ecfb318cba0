//! Unified error type for RPC calls.
//!
//! `RpcError` combines `MessagingError` (send-side errors) and `ReplyError`
//! (everything observed after the request left) so that
//! [`RpcClient::call`](crate::RpcClient::call) can return a single type.

use crate::error::MessagingError;
use crate::rpc::ReplyError;

/// Unified error type for RPC calls.
#[derive(Debug)]
pub enum RpcError {
    /// The request could not be sent.
    ///
    /// This includes serialization failures, a closed transport and
    /// call-map refusals.
    Messaging(MessagingError),

    /// The request was sent but did not produce a usable reply.
    ///
    /// This includes remote errors, connection loss, timeouts and response
    /// decoding failures.
    Reply(ReplyError),
}

impl RpcError {
    /// The reply error, if this is one.
    pub fn as_reply(&self) -> Option<&ReplyError> {
        match self {
            RpcError::Reply(e) => Some(e),
            RpcError::Messaging(_) => None,
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Messaging(e) => write!(f, "messaging error: {}", e),
            RpcError::Reply(e) => write!(f, "reply error: {}", e),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RpcError::Messaging(e) => Some(e),
            RpcError::Reply(e) => Some(e),
        }
    }
}

impl From<MessagingError> for RpcError {
    fn from(err: MessagingError) -> Self {
        RpcError::Messaging(err)
    }
}

impl From<ReplyError> for RpcError {
    fn from(err: ReplyError) -> Self {
        RpcError::Reply(err)
    }
}
