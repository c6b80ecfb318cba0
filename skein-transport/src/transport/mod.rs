//! Call framing over a single connection.
//!
//! A [`Transport`] owns one [`Connection`] split into a read half and a write
//! half. Writers share the write half under an async lock held only while a
//! pre-encoded frame is pushed out, so frames never interleave. The read half
//! feeds a buffer that is parsed incrementally with [`take_frame`].
//!
//! The transport also owns the [`CallMap`] of its connection: whatever kills
//! the connection (local close, EOF, I/O failure, malformed input) cancels
//! every outstanding call with the same error.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use skein_core::Connection;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex as AsyncMutex, watch};

use crate::call::Call;
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::rpc::CallMap;
use crate::wire::{encode_segments, take_frame};

type BoxedConn = Box<dyn Connection>;

/// Framed, bidirectional call channel over one connection.
///
/// Shared between tasks behind an `Arc`; every method takes `&self`.
pub struct Transport {
    conn_id: String,
    config: TransportConfig,
    reader: AsyncMutex<Option<(ReadHalf<BoxedConn>, BytesMut)>>,
    writer: AsyncMutex<Option<WriteHalf<BoxedConn>>>,
    calls: CallMap,
    closing: AtomicBool,
    failure: Mutex<Option<TransportError>>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("conn_id", &self.conn_id)
            .field("closing", &self.closing.load(Ordering::Relaxed))
            .field("failure", &*self.failure.lock())
            .field("calls", &self.calls)
            .finish()
    }
}

impl Transport {
    /// Wrap `conn` in a transport.
    pub fn new<C: Connection>(conn: C, config: TransportConfig) -> Self {
        let conn_id = conn.id();
        let boxed: BoxedConn = Box::new(conn);
        let (read_half, write_half) = tokio::io::split(boxed);
        let buffer = BytesMut::with_capacity(config.read_buffer_size);
        let (shutdown, _) = watch::channel(false);

        tracing::debug!(conn = %conn_id, "transport opened");

        Self {
            conn_id,
            config,
            reader: AsyncMutex::new(Some((read_half, buffer))),
            writer: AsyncMutex::new(Some(write_half)),
            calls: CallMap::new(),
            closing: AtomicBool::new(false),
            failure: Mutex::new(None),
            shutdown,
        }
    }

    /// Diagnostic identity of the underlying connection.
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Pending calls issued over this connection.
    pub fn calls(&self) -> &CallMap {
        &self.calls
    }

    /// True once the transport was closed or failed.
    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Write one call as a single frame.
    ///
    /// Frames larger than the configured ceiling are refused with
    /// [`TransportError::Malformed`] without affecting the connection. An I/O
    /// failure is terminal, since a partially written frame leaves the stream
    /// unusable.
    pub async fn write_call(&self, call: &Call) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(self.terminal_error());
        }
        let segments = encode_segments(call, self.config.max_frame_size)?;

        let mut shutdown = self.shutdown.subscribe();
        let mut guard = self.writer.lock().await;
        let Some(half) = guard.as_mut() else {
            return Err(self.terminal_error());
        };

        let result = tokio::select! {
            res = write_segments(half, &segments) => res,
            _ = shutdown.wait_for(|closed| *closed) => return Err(self.terminal_error()),
        };

        match result {
            Ok(()) => {
                tracing::trace!(
                    conn = %self.conn_id,
                    call_id = %call.id,
                    method = %call.method,
                    direction = ?call.direction,
                    blobs = call.blobs.len(),
                    "wrote call"
                );
                Ok(())
            }
            Err(e) => {
                let err = TransportError::io(Some(call.id), &e);
                *guard = None;
                drop(guard);
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Read the next call from the connection.
    ///
    /// Blocks until a whole frame is buffered. EOF, I/O failures and malformed
    /// frames are terminal: the transport is marked broken and every pending
    /// call is cancelled with the same error.
    pub async fn read_call(&self) -> Result<Call, TransportError> {
        let mut shutdown = self.shutdown.subscribe();
        let mut guard = self.reader.lock().await;

        let outcome = loop {
            let Some((half, buffer)) = guard.as_mut() else {
                return Err(self.terminal_error());
            };

            match take_frame(buffer, self.config.max_frame_size) {
                Ok(Some(call)) => {
                    tracing::trace!(
                        conn = %self.conn_id,
                        call_id = %call.id,
                        method = %call.method,
                        direction = ?call.direction,
                        "read call"
                    );
                    return Ok(call);
                }
                Ok(None) => {}
                Err(e) => break TransportError::Malformed(e),
            }

            let read = tokio::select! {
                res = half.read_buf(buffer) => res,
                _ = shutdown.wait_for(|closed| *closed) => return Err(self.terminal_error()),
            };

            match read {
                Ok(0) if buffer.is_empty() => break TransportError::Eof,
                Ok(0) => {
                    break TransportError::io(
                        None,
                        &std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "connection closed mid-frame",
                        ),
                    );
                }
                Ok(_) => {}
                Err(e) => break TransportError::io(None, &e),
            }
        };

        *guard = None;
        drop(guard);
        self.fail(outcome.clone());
        Err(outcome)
    }

    /// Close the connection.
    ///
    /// Wakes every task blocked in [`read_call`](Self::read_call) or
    /// [`write_call`](Self::write_call) with [`TransportError::Closed`] and
    /// cancels all pending calls. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), TransportError> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown.send_replace(true);
        self.calls.cancel_all(TransportError::Closed);

        drop(self.reader.lock().await.take());
        let writer = self.writer.lock().await.take();

        tracing::debug!(conn = %self.conn_id, "transport closed");

        if let Some(mut half) = writer {
            if let Err(e) = half.shutdown().await {
                if e.kind() != std::io::ErrorKind::NotConnected {
                    return Err(TransportError::io(None, &e));
                }
            }
        }
        Ok(())
    }

    fn fail(&self, err: TransportError) {
        {
            let mut failure = self.failure.lock();
            if failure.is_some() {
                return;
            }
            *failure = Some(err.clone());
        }
        match &err {
            TransportError::Eof => tracing::debug!(conn = %self.conn_id, "peer closed connection"),
            _ => tracing::warn!(conn = %self.conn_id, error = %err, "transport failed"),
        }
        self.shutdown.send_replace(true);
        self.calls.cancel_all(err);
    }

    fn terminal_error(&self) -> TransportError {
        if self.closing.load(Ordering::Acquire) {
            return TransportError::Closed;
        }
        self.failure
            .lock()
            .clone()
            .unwrap_or(TransportError::Closed)
    }
}

async fn write_segments(
    half: &mut WriteHalf<BoxedConn>,
    segments: &[Bytes],
) -> std::io::Result<()> {
    for segment in segments {
        half.write_all(segment).await?;
    }
    half.flush().await
}
