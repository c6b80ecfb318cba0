//! EndpointMap: method selector → handler routing.
//!
//! Populated while a server is being built and read-only afterwards, so
//! lookups need no locking.

use std::collections::HashMap;
use std::sync::Arc;

use skein_core::MessageCodec;

use crate::error::MessagingError;
use crate::rpc::endpoint::{Dispatch, Endpoint};

/// Maps method selectors to type-erased handlers.
///
/// At most one handler per selector.
pub struct EndpointMap<C: MessageCodec> {
    handlers: HashMap<String, Arc<dyn Dispatch<C>>>,
}

impl<C: MessageCodec> Default for EndpointMap<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: MessageCodec> EndpointMap<C> {
    /// Create a new empty endpoint map.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::DuplicateEndpoint`] if the selector is
    /// already taken; the existing handler is kept.
    pub fn insert(&mut self, endpoint: Endpoint<C>) -> Result<(), MessagingError> {
        let (method, handler) = endpoint.into_parts();
        if self.handlers.contains_key(&method) {
            return Err(MessagingError::DuplicateEndpoint { method });
        }
        tracing::debug!(method = %method, "endpoint registered");
        self.handlers.insert(method, handler);
        Ok(())
    }

    /// Look up the handler for a selector.
    pub fn get(&self, method: &str) -> Option<Arc<dyn Dispatch<C>>> {
        self.handlers.get(method).cloned()
    }

    /// Registered selectors, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    /// Number of registered endpoints.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no endpoint is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<C: MessageCodec> std::fmt::Debug for EndpointMap<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointMap")
            .field("methods", &self.methods())
            .finish()
    }
}
