//! Configuration structures for transports, pools, clients and servers.

use std::time::Duration;

use crate::wire::DEFAULT_MAX_FRAME_SIZE;

/// Configuration for a single [`Transport`](crate::Transport).
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Largest frame accepted on read or produced on write.
    pub max_frame_size: usize,

    /// Initial capacity of the read buffer.
    pub read_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buffer_size: 64 * 1024,
        }
    }
}

impl TransportConfig {
    /// Override the frame size ceiling.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Override the initial read buffer capacity.
    pub fn with_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size;
        self
    }
}

/// Configuration for a [`WorkerPool`](crate::WorkerPool).
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Pool name, used as a span field in logs.
    pub name: String,

    /// Workers spawned up front.
    pub initial_workers: usize,

    /// Upper bound on live workers. Tasks queue once it is reached.
    pub max_workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "rpc".to_string(),
            initial_workers: 4,
            max_workers: 64,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with explicit sizes.
    ///
    /// `max_workers` is raised to `initial_workers` (and to at least one) so
    /// the pool can always make progress.
    pub fn new(name: impl Into<String>, initial_workers: usize, max_workers: usize) -> Self {
        Self {
            name: name.into(),
            initial_workers,
            max_workers: max_workers.max(initial_workers).max(1),
        }
    }

    /// A fixed-size pool that never grows.
    pub fn fixed(name: impl Into<String>, workers: usize) -> Self {
        Self::new(name, workers, workers)
    }
}

/// Configuration for an [`RpcClient`](crate::RpcClient).
#[derive(Clone, Debug, Default)]
pub struct ClientConfig {
    /// Per-call deadline. `None` waits until the response or connection loss.
    pub call_timeout: Option<Duration>,

    /// Settings for the client's transport.
    pub transport: TransportConfig,
}

impl ClientConfig {
    /// Set a per-call deadline.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Use the given transport settings.
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

/// Configuration for an [`RpcServer`](crate::RpcServer).
#[derive(Clone, Debug, Default)]
pub struct ServerConfig {
    /// Worker pool running request handlers.
    pub pool: PoolConfig,

    /// Settings for every served transport.
    pub transport: TransportConfig,
}

impl ServerConfig {
    /// Use the given pool settings.
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Use the given transport settings.
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}
