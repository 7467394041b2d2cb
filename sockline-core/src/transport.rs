//! Transport layer abstraction
//!
//! A [`Transport`] is a source of accepted byte streams. The server only needs
//! to accept, read and write, so any `AsyncRead + AsyncWrite` stream works:
//! TCP sockets in production, in-memory duplex pipes in tests.

use crate::error::{Error, Result};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::sync::{mpsc, Mutex};

/// Transport trait for abstracting different transport types
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The stream type produced by this transport
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Accept an incoming connection
    ///
    /// Returns [`Error::TransportClosed`] once no further connections can
    /// arrive; callers should stop accepting at that point.
    async fn accept(&self) -> Result<(Self::Stream, SocketAddr)>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;
}

const MEMORY_BUFFER_SIZE: usize = 64 * 1024;

/// In-process transport backed by [`tokio::io::duplex`] pipes
///
/// Each [`MemoryConnector::connect`] hands the client end of a fresh pipe to
/// the caller and queues the server end for [`Transport::accept`].
#[derive(Debug)]
pub struct MemoryTransport {
    incoming: Mutex<mpsc::Receiver<(DuplexStream, SocketAddr)>>,
    local_addr: SocketAddr,
}

/// Client side of a [`MemoryTransport`]
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    outgoing: mpsc::Sender<(DuplexStream, SocketAddr)>,
    next_port: std::sync::Arc<AtomicU16>,
}

impl MemoryTransport {
    /// Create a transport and the connector that feeds it
    pub fn new() -> (Self, MemoryConnector) {
        let (tx, rx) = mpsc::channel(64);
        let transport = Self {
            incoming: Mutex::new(rx),
            local_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        };
        let connector = MemoryConnector {
            outgoing: tx,
            next_port: std::sync::Arc::new(AtomicU16::new(40_000)),
        };
        (transport, connector)
    }
}

impl MemoryConnector {
    /// Open a new connection; the returned stream is the client end
    pub async fn connect(&self) -> Result<DuplexStream> {
        let (client, server) = tokio::io::duplex(MEMORY_BUFFER_SIZE);
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        let peer = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

        self.outgoing
            .send((server, peer))
            .await
            .map_err(|_| Error::TransportClosed)?;
        Ok(client)
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    type Stream = DuplexStream;

    async fn accept(&self) -> Result<(Self::Stream, SocketAddr)> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or(Error::TransportClosed)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }
}
