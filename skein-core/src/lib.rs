//! # skein-core
//!
//! Shared abstractions for the skein RPC layer.
//!
//! - **Connection**: [`Connection`] byte streams and [`NetworkProvider`]s that
//!   produce them
//! - **Codec**: [`MessageCodec`] for call bodies, with [`JsonCodec`] as default
//! - **Blob**: the [`RpcMessage`] capability and the blob side-channel helpers
//! - **Naming**: [`Registrar`] for publishing server addresses

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod blob;
mod codec;
mod naming;
mod network;

pub use blob::{Blob, RpcMessage, extract_blob, has_blob_field, inject_blob};
pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use naming::{MemoryRegistrar, NamingError, Registrar};
pub use network::{Connection, Listener, NetworkProvider, TokioNetworkProvider, TokioTcpListener};
