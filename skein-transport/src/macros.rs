//! Macros for reducing RPC boilerplate.
//!
//! - [`rpc_messages!`]: declare message types with the derives and the
//!   [`RpcMessage`](crate::RpcMessage) impl every endpoint needs
//!
//! Message types that carry a [`Blob`](crate::Blob) field implement
//! [`RpcMessage`](crate::RpcMessage) by hand instead, overriding
//! [`blob`](crate::RpcMessage::blob).

/// Define RPC message types without a blob field.
///
/// Each struct gets `#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]`
/// and an empty `RpcMessage` impl. The calling crate must depend on `serde`.
///
/// # Example
///
/// ```rust
/// use skein_transport::rpc_messages;
///
/// rpc_messages! {
///     /// Request to add two numbers
///     pub struct AddRequest {
///         pub a: i64,
///         pub b: i64,
///     }
///
///     /// The sum
///     pub struct AddReply {
///         pub result: i64,
///     }
/// }
///
/// let mut req = AddRequest { a: 1, b: 2 };
/// assert!(!skein_transport::has_blob_field(&mut req));
/// ```
#[macro_export]
macro_rules! rpc_messages {
    (
        $(
            $(#[$meta:meta])*
            $vis:vis struct $name:ident {
                $(
                    $(#[$field_meta:meta])*
                    $field_vis:vis $field:ident : $ty:ty
                ),* $(,)?
            }
        )*
    ) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
            $vis struct $name {
                $(
                    $(#[$field_meta])*
                    $field_vis $field : $ty,
                )*
            }

            impl $crate::RpcMessage for $name {}
        )*
    };
}
