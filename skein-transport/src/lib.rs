//! # skein-transport
//!
//! RPC transport and dispatch core.
//!
//! This crate provides:
//! - **Wire format**: little-endian call frames with a blob side-channel
//! - **Transport**: framed, write-serialized calls over one connection
//! - **Call map**: correlation of in-flight requests with their responses
//! - **Worker pool**: expandable pool of tasks running request handlers
//! - **RPC**: typed endpoints, the dispatching server and the calling client

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export core types for convenience
pub use skein_core::{
    Blob, CodecError, Connection, JsonCodec, Listener, MemoryRegistrar, MessageCodec, NamingError,
    NetworkProvider, Registrar, RpcMessage, TokioNetworkProvider, TokioTcpListener, extract_blob,
    has_blob_field, inject_blob,
};

// =============================================================================
// Modules
// =============================================================================

/// The call: unit of exchange on a connection.
pub mod call;

/// Configuration structures.
pub mod config;

/// Error types for transport operations.
pub mod error;

/// Worker pool for request handlers.
pub mod pool;

/// Request/response layer.
pub mod rpc;

/// Tracing setup.
pub mod telemetry;

/// Framing of calls over a connection.
pub mod transport;

/// Frame and error descriptor codecs.
pub mod wire;

mod macros;

// =============================================================================
// Public API Re-exports
// =============================================================================

// Call exports
pub use call::{Call, CallId, Direction, Status};

// Config exports
pub use config::{ClientConfig, PoolConfig, ServerConfig, TransportConfig};

// Error exports
pub use error::{MessagingError, TransportError};

// Pool exports
pub use pool::{PoolError, Task, WorkerPool};

// Transport exports
pub use transport::Transport;

// Wire format exports
pub use wire::{
    DEFAULT_MAX_FRAME_SIZE, ErrorDescriptor, ErrorKind, WireError, decode_frame, encode_frame,
    encode_segments, frame_size, take_frame,
};

// RPC exports
pub use rpc::{
    CallMap, CallMapError, Endpoint, EndpointMap, HandlerError, ReplyError, RpcClient, RpcError,
    RpcServer, RpcServerBuilder, WaitOutcome, Waiter,
};
