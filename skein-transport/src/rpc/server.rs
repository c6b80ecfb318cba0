//! Server-side dispatch of incoming calls.
//!
//! An [`RpcServer`] owns an immutable [`EndpointMap`] and a [`WorkerPool`].
//! Each served connection gets a read loop; every request it reads becomes a
//! pool task that runs the endpoint and writes exactly one response (or error
//! response) back. Responses that arrive on a served connection are handed to
//! the transport's call map, so the same connection can carry calls in both
//! directions.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use skein_core::{Connection, Listener, MessageCodec, Registrar};
use tokio::sync::watch;

use crate::call::Call;
use crate::config::ServerConfig;
use crate::error::{MessagingError, TransportError};
use crate::pool::{WorkerPool, panic_message};
use crate::rpc::{Endpoint, EndpointMap, ReplyError};
use crate::transport::Transport;

/// Builder collecting endpoints before a server starts.
pub struct RpcServerBuilder<C: MessageCodec> {
    codec: C,
    config: ServerConfig,
    endpoints: EndpointMap<C>,
}

impl<C: MessageCodec> std::fmt::Debug for RpcServerBuilder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServerBuilder")
            .field("config", &self.config)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl<C: MessageCodec> RpcServerBuilder<C> {
    /// Use the given server configuration.
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Expose an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::DuplicateEndpoint`] if the selector is
    /// already exposed.
    pub fn expose(mut self, endpoint: Endpoint<C>) -> Result<Self, MessagingError> {
        self.endpoints.insert(endpoint)?;
        Ok(self)
    }

    /// Start the worker pool and return the server.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> RpcServer<C> {
        let pool = WorkerPool::new(self.config.pool.clone());
        let (stopping, _) = watch::channel(false);
        RpcServer {
            inner: Arc::new(ServerInner {
                codec: self.codec,
                config: self.config,
                endpoints: self.endpoints,
                pool,
                stopping,
                published: Mutex::new(None),
            }),
        }
    }
}

struct Published {
    name: String,
    registrar: Arc<dyn Registrar>,
}

struct ServerInner<C: MessageCodec> {
    codec: C,
    config: ServerConfig,
    endpoints: EndpointMap<C>,
    pool: WorkerPool,
    stopping: watch::Sender<bool>,
    published: Mutex<Option<Published>>,
}

/// Dispatches calls from any number of connections to registered endpoints.
///
/// Cheap to clone; clones share endpoints and the worker pool.
pub struct RpcServer<C: MessageCodec> {
    inner: Arc<ServerInner<C>>,
}

impl<C: MessageCodec> Clone for RpcServer<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: MessageCodec> std::fmt::Debug for RpcServer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("endpoints", &self.inner.endpoints)
            .field("pool", &self.inner.pool)
            .finish()
    }
}

impl<C: MessageCodec> RpcServer<C> {
    /// Start building a server that decodes bodies with `codec`.
    pub fn builder(codec: C) -> RpcServerBuilder<C> {
        RpcServerBuilder {
            codec,
            config: ServerConfig::default(),
            endpoints: EndpointMap::new(),
        }
    }

    /// Exposed endpoints.
    pub fn endpoints(&self) -> &EndpointMap<C> {
        &self.inner.endpoints
    }

    /// The pool running handlers.
    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Serve calls arriving on `transport` until it closes, fails, or the
    /// server shuts down.
    ///
    /// A clean close (local or by the peer) returns `Ok`. Handlers still
    /// running keep their own handle on the transport and reply when done.
    pub async fn serve(&self, transport: Arc<Transport>) -> Result<(), TransportError> {
        let mut stopping = self.inner.stopping.subscribe();
        tracing::debug!(conn = %transport.conn_id(), "serving connection");

        loop {
            let call = tokio::select! {
                res = transport.read_call() => res,
                _ = stopping.wait_for(|s| *s) => {
                    tracing::debug!(conn = %transport.conn_id(), "server stopping, leaving connection");
                    return Ok(());
                }
            };

            let call = match call {
                Ok(call) => call,
                Err(TransportError::Closed | TransportError::Eof) => {
                    tracing::debug!(conn = %transport.conn_id(), "connection finished");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            if !call.is_request() {
                transport.calls().resolve(call);
                continue;
            }

            let (id, method) = (call.id, call.method.clone());
            let task = handle_request(self.inner.clone(), transport.clone(), call);
            if let Err(e) = self.inner.pool.run(Box::pin(task)) {
                tracing::warn!(call_id = %id, method = %method, error = %e, "request refused");
                let stub = Call::request(id, method, Bytes::new(), Vec::new());
                let refusal = Call::error_response(
                    &stub,
                    ReplyError::Unknown {
                        message: "server is shutting down".to_string(),
                    }
                    .to_descriptor()
                    .encode(),
                );
                if let Err(e) = transport.write_call(&refusal).await {
                    tracing::warn!(call_id = %id, error = %e, "failed to send refusal");
                }
            }
        }
    }

    /// Wrap `conn` in a transport and serve it.
    pub async fn serve_connection<Conn: Connection>(
        &self,
        conn: Conn,
    ) -> Result<(), TransportError> {
        let transport = Arc::new(Transport::new(conn, self.inner.config.transport.clone()));
        self.serve(transport).await
    }

    /// Accept connections from `listener` and serve each on its own task.
    ///
    /// Returns once the server shuts down, or with the error of a failed
    /// accept.
    pub async fn listen<L: Listener>(&self, listener: L) -> std::io::Result<()> {
        let mut stopping = self.inner.stopping.subscribe();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "listening");
        }

        loop {
            let conn = tokio::select! {
                res = listener.accept() => res?,
                _ = stopping.wait_for(|s| *s) => return Ok(()),
            };
            let server = self.clone();
            tokio::spawn(async move {
                let conn_id = conn.id();
                if let Err(e) = server.serve_connection(conn).await {
                    tracing::warn!(conn = %conn_id, error = %e, "connection failed");
                }
            });
        }
    }

    /// Publish `address` under `name` once the server is ready to take calls.
    ///
    /// The name is withdrawn again by [`shutdown`](Self::shutdown).
    pub async fn publish(
        &self,
        name: &str,
        registrar: Arc<dyn Registrar>,
        address: &str,
    ) -> Result<(), MessagingError> {
        registrar.register(name, address).await?;
        tracing::info!(name, address, "server published");

        let previous = self.inner.published.lock().replace(Published {
            name: name.to_string(),
            registrar,
        });
        if let Some(previous) = previous {
            withdraw(previous).await;
        }
        Ok(())
    }

    /// Withdraw the published name, stop accepting and reading, and wait for
    /// in-flight handlers to finish.
    pub async fn shutdown(&self) {
        let published = self.inner.published.lock().take();
        if let Some(published) = published {
            withdraw(published).await;
        }
        self.inner.stopping.send_replace(true);
        self.inner.pool.shutdown().await;
        tracing::debug!("server shut down");
    }
}

async fn withdraw(published: Published) {
    if let Err(e) = published.registrar.deregister(&published.name).await {
        tracing::warn!(name = %published.name, error = %e, "failed to withdraw name");
    }
}

async fn handle_request<C: MessageCodec>(
    inner: Arc<ServerInner<C>>,
    transport: Arc<Transport>,
    mut call: Call,
) {
    let outcome = match inner.endpoints.get(&call.method) {
        None => {
            tracing::debug!(call_id = %call.id, method = %call.method, "unknown method");
            Err(ReplyError::UnknownMethod {
                method: call.method.clone(),
            })
        }
        Some(endpoint) => {
            let blobs = std::mem::take(&mut call.blobs);
            let body = call.body.clone();
            let codec = &inner.codec;
            let run = async move { endpoint.dispatch(codec, &body, blobs).await };
            match AssertUnwindSafe(run).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic_message(panic.as_ref()).to_string();
                    tracing::error!(
                        call_id = %call.id,
                        method = %call.method,
                        panic = %message,
                        "handler panicked"
                    );
                    Err(ReplyError::HandlerPanicked { message })
                }
            }
        }
    };

    let response = match outcome {
        Ok((body, blobs)) => Call::response(&call, body, blobs),
        Err(e) => {
            tracing::debug!(call_id = %call.id, method = %call.method, error = %e, "request failed");
            Call::error_response(&call, e.to_descriptor().encode())
        }
    };

    match transport.write_call(&response).await {
        Ok(()) => {}
        Err(TransportError::Malformed(e)) => {
            // Response exceeds the frame ceiling; tell the caller instead.
            let fallback = Call::error_response(
                &call,
                ReplyError::Serialization {
                    message: e.to_string(),
                }
                .to_descriptor()
                .encode(),
            );
            if let Err(e) = transport.write_call(&fallback).await {
                tracing::warn!(call_id = %call.id, error = %e, "failed to send error response");
            }
        }
        Err(e) => {
            tracing::warn!(call_id = %call.id, method = %call.method, error = %e, "failed to send response");
        }
    }
}
