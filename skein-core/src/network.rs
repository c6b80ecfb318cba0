//! Connection and network provider abstractions.
//!
//! The transport only needs an ordered, reliable byte stream. [`Connection`]
//! names that requirement plus a diagnostic identity. [`NetworkProvider`] lets
//! servers and clients obtain connections without caring whether they are TCP,
//! Unix-domain or in-memory.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// An ordered, reliable byte stream owned by a single transport.
///
/// Closing is done by dropping (or shutting down) the stream.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Opaque identity used only for log lines.
    fn id(&self) -> String;
}

impl Connection for tokio::net::TcpStream {
    fn id(&self) -> String {
        match (self.local_addr(), self.peer_addr()) {
            (Ok(local), Ok(peer)) => format!("tcp:{local}->{peer}"),
            _ => "tcp:unknown".to_string(),
        }
    }
}

#[cfg(unix)]
impl Connection for tokio::net::UnixStream {
    fn id(&self) -> String {
        match self.peer_addr() {
            Ok(addr) => match addr.as_pathname() {
                Some(path) => format!("unix:{}", path.display()),
                None => "unix:unnamed".to_string(),
            },
            Err(_) => "unix:unknown".to_string(),
        }
    }
}

impl Connection for tokio::io::DuplexStream {
    fn id(&self) -> String {
        "duplex".to_string()
    }
}

/// Provider trait for creating listeners and outbound connections.
///
/// Clone allows handing the provider to every accept loop.
#[async_trait]
pub trait NetworkProvider: Clone + Send + Sync + 'static {
    /// The connection type produced by this provider.
    type Conn: Connection;
    /// The listener type for this provider.
    type Listener: Listener<Conn = Self::Conn>;

    /// Create a listener bound to the given address.
    async fn bind(&self, addr: &str) -> io::Result<Self::Listener>;

    /// Connect to a remote address.
    async fn connect(&self, addr: &str) -> io::Result<Self::Conn>;
}

/// A bound listener that yields connections.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// The connection type this listener produces.
    type Conn: Connection;

    /// Accept a single incoming connection.
    async fn accept(&self) -> io::Result<Self::Conn>;

    /// Address peers should dial to reach this listener.
    fn local_addr(&self) -> io::Result<String>;
}

/// TCP networking on the Tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TokioNetworkProvider;

impl TokioNetworkProvider {
    /// Create a new Tokio network provider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NetworkProvider for TokioNetworkProvider {
    type Conn = tokio::net::TcpStream;
    type Listener = TokioTcpListener;

    async fn bind(&self, addr: &str) -> io::Result<Self::Listener> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        Ok(TokioTcpListener { inner })
    }

    async fn connect(&self, addr: &str) -> io::Result<Self::Conn> {
        let stream = tokio::net::TcpStream::connect(addr).await?;
        // Small request frames should not wait for Nagle coalescing.
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Wrapper for Tokio's `TcpListener` implementing [`Listener`].
#[derive(Debug)]
pub struct TokioTcpListener {
    inner: tokio::net::TcpListener,
}

#[async_trait]
impl Listener for TokioTcpListener {
    type Conn = tokio::net::TcpStream;

    async fn accept(&self) -> io::Result<Self::Conn> {
        let (stream, _) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn local_addr(&self) -> io::Result<String> {
        Ok(self.inner.local_addr()?.to_string())
    }
}
