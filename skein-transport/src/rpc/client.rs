//! Caller side of a connection.
//!
//! [`RpcClient::call`] is the whole request lifecycle: assign an id, move the
//! blob out of the request, encode, register a waiter, write the frame, wait
//! for the matching response and rebuild a typed reply from it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use skein_core::{Connection, MessageCodec, NetworkProvider, RpcMessage, extract_blob, inject_blob};
use tokio::task::JoinHandle;

use crate::call::{Call, CallId};
use crate::config::ClientConfig;
use crate::error::{MessagingError, TransportError};
use crate::rpc::call_map::{CallMapError, WaitOutcome};
use crate::rpc::{ReplyError, RpcError};
use crate::transport::Transport;
use crate::wire::ErrorDescriptor;

/// Typed RPC calls over one connection.
pub struct RpcClient<C: MessageCodec> {
    transport: Arc<Transport>,
    codec: C,
    config: ClientConfig,
    next_id: AtomicU64,
    reader: Option<JoinHandle<()>>,
}

impl<C: MessageCodec> std::fmt::Debug for RpcClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("transport", &self.transport)
            .field("config", &self.config)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl<C: MessageCodec> RpcClient<C> {
    /// Wrap `conn` and start the read loop that routes responses to callers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<Conn: Connection>(conn: Conn, codec: C, config: ClientConfig) -> Self {
        let transport = Arc::new(Transport::new(conn, config.transport.clone()));
        let reader = tokio::spawn(read_loop(transport.clone()));
        Self {
            transport,
            codec,
            config,
            next_id: AtomicU64::new(1),
            reader: Some(reader),
        }
    }

    /// Issue calls over a transport whose reads are driven elsewhere.
    ///
    /// Used to call back over a connection an [`RpcServer`](crate::RpcServer)
    /// is serving: the server's read loop resolves the responses.
    pub fn from_transport(transport: Arc<Transport>, codec: C, config: ClientConfig) -> Self {
        Self {
            transport,
            codec,
            config,
            next_id: AtomicU64::new(1),
            reader: None,
        }
    }

    /// Dial `addr` through `provider`.
    pub async fn connect<P: NetworkProvider>(
        provider: &P,
        addr: &str,
        codec: C,
        config: ClientConfig,
    ) -> Result<Self, MessagingError> {
        let conn = provider
            .connect(addr)
            .await
            .map_err(|e| TransportError::io(None, &e))?;
        tracing::debug!(addr, conn = %conn.id(), "connected");
        Ok(Self::new(conn, codec, config))
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Call `method` with `request` and wait for the typed reply.
    ///
    /// # Errors
    ///
    /// [`RpcError::Messaging`] when the request could not be sent,
    /// [`RpcError::Reply`] for remote errors, connection loss, the call
    /// timeout, or an undecodable reply.
    pub async fn call<Req, Resp>(&self, method: &str, mut request: Req) -> Result<Resp, RpcError>
    where
        Req: RpcMessage,
        Resp: RpcMessage,
    {
        let id = CallId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let blobs = extract_blob(&mut request);
        let body = self.codec.encode(&request).map_err(MessagingError::from)?;
        let call = Call::request(id, method, body, blobs);

        let calls = self.transport.calls();
        let waiter = calls.register(id).map_err(|e| match e {
            CallMapError::Closed(err) => MessagingError::Transport(err),
            other => MessagingError::CallMap(other),
        })?;

        if let Err(e) = self.transport.write_call(&call).await {
            calls.fail(id, e.clone());
            return Err(MessagingError::Transport(e).into());
        }
        tracing::trace!(call_id = %id, method, "call sent");

        let outcome = match self.config.call_timeout {
            Some(timeout) => match waiter.wait_timeout(timeout).await {
                WaitOutcome::Completed(outcome) => outcome,
                WaitOutcome::TimedOut => return Err(ReplyError::Timeout.into()),
            },
            None => waiter.wait().await,
        };
        let reply = outcome.map_err(ReplyError::from)?;

        if reply.is_error() {
            let descriptor =
                ErrorDescriptor::decode(&reply.body).map_err(|e| ReplyError::Serialization {
                    message: e.to_string(),
                })?;
            return Err(ReplyError::from(descriptor).into());
        }

        let mut response: Resp =
            self.codec
                .decode(&reply.body)
                .map_err(|e| ReplyError::Serialization {
                    message: e.to_string(),
                })?;
        inject_blob(&mut response, reply.blobs);
        Ok(response)
    }

    /// Close the connection. Outstanding calls fail with
    /// [`ReplyError::ConnectionFailed`].
    pub async fn close(&self) -> Result<(), TransportError> {
        self.transport.close().await
    }
}

impl<C: MessageCodec> Drop for RpcClient<C> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Route responses to waiters until the connection ends.
///
/// A client exposes no endpoints, so requests from the peer are refused.
async fn read_loop(transport: Arc<Transport>) {
    loop {
        let call = match transport.read_call().await {
            Ok(call) => call,
            Err(e) => {
                // The transport has already cancelled every waiter.
                tracing::debug!(conn = %transport.conn_id(), error = %e, "client read loop finished");
                return;
            }
        };

        if !call.is_request() {
            transport.calls().resolve(call);
            continue;
        }

        tracing::debug!(call_id = %call.id, method = %call.method, "request sent to a client");
        let refusal = Call::error_response(
            &call,
            ReplyError::UnknownMethod {
                method: call.method.clone(),
            }
            .to_descriptor()
            .encode(),
        );
        if let Err(e) = transport.write_call(&refusal).await {
            tracing::debug!(call_id = %call.id, error = %e, "failed to refuse request");
        }
    }
}
