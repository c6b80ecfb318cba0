//! Typed endpoints and their type-erased dispatch form.
//!
//! An [`Endpoint`] binds a method selector to an async handler taking a
//! request message and producing a response message. Registration erases
//! the message types: the server only ever sees raw bodies and blob lists,
//! and the endpoint decodes, injects blobs, runs the handler, extracts blobs
//! and encodes on its behalf.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use skein_core::{MessageCodec, RpcMessage, extract_blob, inject_blob};

use crate::rpc::ReplyError;

/// Failure reported by a handler.
///
/// Travels to the caller as [`ReplyError::Handler`] with the same message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Type-erased handler as stored in an [`EndpointMap`](crate::EndpointMap).
pub trait Dispatch<C: MessageCodec>: Send + Sync {
    /// Decode `body`, run the handler and encode its response together with
    /// its blob buffers.
    ///
    /// Decode failures resolve to [`ReplyError::InvalidRequest`], handler
    /// failures to [`ReplyError::Handler`], and response encoding failures to
    /// [`ReplyError::Serialization`].
    fn dispatch(
        &self,
        codec: &C,
        body: &[u8],
        blobs: Vec<Bytes>,
    ) -> BoxFuture<'static, Result<(Bytes, Vec<Bytes>), ReplyError>>;
}

struct TypedHandler<Req, Resp, F> {
    handler: F,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<C, Req, Resp, F, Fut> Dispatch<C> for TypedHandler<Req, Resp, F>
where
    C: MessageCodec,
    Req: RpcMessage,
    Resp: RpcMessage,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, HandlerError>> + Send + 'static,
{
    fn dispatch(
        &self,
        codec: &C,
        body: &[u8],
        blobs: Vec<Bytes>,
    ) -> BoxFuture<'static, Result<(Bytes, Vec<Bytes>), ReplyError>> {
        let mut request: Req = match codec.decode(body) {
            Ok(request) => request,
            Err(e) => {
                let err = ReplyError::InvalidRequest {
                    message: e.to_string(),
                };
                return futures::future::ready(Err(err)).boxed();
            }
        };
        inject_blob(&mut request, blobs);

        let pending = (self.handler)(request);
        let codec = codec.clone();
        async move {
            let mut response = pending.await.map_err(|e| ReplyError::Handler {
                message: e.message,
            })?;
            let blobs = extract_blob(&mut response);
            let body = codec
                .encode(&response)
                .map_err(|e| ReplyError::Serialization {
                    message: e.to_string(),
                })?;
            Ok((body, blobs))
        }
        .boxed()
    }
}

/// A method selector bound to a handler, ready to be exposed by a server.
pub struct Endpoint<C: MessageCodec> {
    method: String,
    handler: Arc<dyn Dispatch<C>>,
}

impl<C: MessageCodec> Endpoint<C> {
    /// Bind `method` to `handler`.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let echo = Endpoint::new("EchoSrv.Echo", |req: EchoRequest| async move {
    ///     Ok::<_, HandlerError>(EchoReply { text: req.text })
    /// });
    /// ```
    pub fn new<Req, Resp, F, Fut>(method: impl Into<String>, handler: F) -> Self
    where
        Req: RpcMessage,
        Resp: RpcMessage,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, HandlerError>> + Send + 'static,
    {
        Self {
            method: method.into(),
            handler: Arc::new(TypedHandler {
                handler,
                _types: PhantomData,
            }),
        }
    }

    /// The method selector.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub(crate) fn into_parts(self) -> (String, Arc<dyn Dispatch<C>>) {
        (self.method, self.handler)
    }
}

impl<C: MessageCodec> std::fmt::Debug for Endpoint<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}
