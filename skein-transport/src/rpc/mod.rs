//! Request/response layer on top of the transport.
//!
//! - **CallMap**: correlation of in-flight requests with their responses
//! - **Endpoint / EndpointMap**: method selector → typed handler routing
//! - **RpcServer**: dispatch of incoming requests onto a worker pool
//! - **RpcClient**: typed calls with optional per-call timeouts
//!
//! # Error model
//!
//! Everything that goes wrong before a request leaves is a
//! [`MessagingError`](crate::MessagingError); everything observed after is a
//! [`ReplyError`]. [`RpcError`] unifies the two for callers.

mod call_map;
mod client;
mod endpoint;
mod endpoint_map;
mod reply_error;
mod rpc_error;
mod server;

pub use call_map::{CallMap, CallMapError, CallOutcome, WaitOutcome, Waiter};
pub use client::RpcClient;
pub use endpoint::{Dispatch, Endpoint, HandlerError};
pub use endpoint_map::EndpointMap;
pub use reply_error::ReplyError;
pub use rpc_error::RpcError;
pub use server::{RpcServer, RpcServerBuilder};
