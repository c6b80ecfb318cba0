//! Endpoint discovery.
//!
//! Servers publish a stable address under a name once they are ready to serve
//! and withdraw it on shutdown. The naming service itself is external; the
//! [`Registrar`] trait is the only contract the RPC layer relies on.
//! [`MemoryRegistrar`] is an in-process implementation that tests (and
//! single-process deployments) pass around by reference.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

/// Errors reported by a naming service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamingError {
    /// Another endpoint already owns the name.
    #[error("name already registered: {name}")]
    AlreadyRegistered {
        /// The contested name.
        name: String,
    },

    /// No endpoint is registered under the name.
    #[error("name not found: {name}")]
    NotFound {
        /// The missing name.
        name: String,
    },

    /// The naming service could not be reached.
    #[error("naming service unavailable: {0}")]
    Unavailable(String),
}

/// Maps published names to reachable addresses.
#[async_trait]
pub trait Registrar: Send + Sync {
    /// Publish `address` under `name`.
    async fn register(&self, name: &str, address: &str) -> Result<(), NamingError>;

    /// Withdraw `name`.
    async fn deregister(&self, name: &str) -> Result<(), NamingError>;

    /// Resolve `name` to an address.
    async fn lookup(&self, name: &str) -> Result<String, NamingError>;
}

/// In-memory registrar.
#[derive(Debug, Default)]
pub struct MemoryRegistrar {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryRegistrar {
    /// Create an empty registrar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of published names.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is published.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl Registrar for MemoryRegistrar {
    async fn register(&self, name: &str, address: &str) -> Result<(), NamingError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(name) {
            return Err(NamingError::AlreadyRegistered {
                name: name.to_string(),
            });
        }
        entries.insert(name.to_string(), address.to_string());
        tracing::debug!(name, address, "registered endpoint");
        Ok(())
    }

    async fn deregister(&self, name: &str) -> Result<(), NamingError> {
        match self.entries.lock().remove(name) {
            Some(_) => {
                tracing::debug!(name, "deregistered endpoint");
                Ok(())
            }
            None => Err(NamingError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    async fn lookup(&self, name: &str) -> Result<String, NamingError> {
        self.entries
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| NamingError::NotFound {
                name: name.to_string(),
            })
    }
}
