//! Connection registry
//!
//! The registry maps connection ids to their protocol state and write half.
//! It is owned by the event loop and never shared, so it needs no locking;
//! every write goes through it and is awaited to completion before the loop
//! moves on, which keeps frames from interleaving on the wire.

use crate::connection::{ConnectionId, ConnectionState, Limits};
use sockline_core::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

/// Write half of a connection
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Why a connection left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Close handshake initiated by the peer
    Normal,
    /// The peer went away without a close frame
    Disconnected,
    /// The peer violated the protocol
    ProtocolError,
    /// A write failed or timed out
    WriteFailed,
    /// Closed through a [`ServerHandle`](crate::ServerHandle)
    Local,
    /// The server is shutting down
    Shutdown,
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Connections currently registered
    pub active_connections: usize,
    /// Connections registered since start
    pub total_connections: u64,
    /// Peak number of concurrent connections
    pub peak_connections: usize,
    /// Close handshakes completed
    pub normal_closures: u64,
    /// Peers that vanished without closing
    pub disconnects: u64,
    /// Connections dropped for protocol violations or write failures
    pub error_closures: u64,
    /// Connections closed by the server
    pub local_closures: u64,
}

struct Entry {
    state: ConnectionState,
    writer: BoxedWriter,
    reader: Option<JoinHandle<()>>,
}

/// All live connections of one server
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Entry>,
    next_id: u64,
    stats: RegistryStats,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connections.len())
            .field("next_id", &self.next_id)
            .field("stats", &self.stats)
            .finish()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted connection in `AwaitingHandshake`
    pub fn register(
        &mut self,
        remote_addr: SocketAddr,
        writer: BoxedWriter,
        limits: Limits,
    ) -> ConnectionId {
        self.next_id += 1;
        let id = ConnectionId::new(self.next_id);

        self.connections.insert(
            id,
            Entry {
                state: ConnectionState::new(id, remote_addr, limits),
                writer,
                reader: None,
            },
        );

        self.stats.total_connections += 1;
        self.stats.active_connections = self.connections.len();
        self.stats.peak_connections = self.stats.peak_connections.max(self.connections.len());
        id
    }

    /// Attach the reader task so it is stopped when the connection goes away
    pub fn attach_reader(&mut self, id: ConnectionId, reader: JoinHandle<()>) {
        match self.connections.get_mut(&id) {
            Some(entry) => entry.reader = Some(reader),
            None => reader.abort(),
        }
    }

    /// Remove a connection, stopping its reader and dropping its writer
    ///
    /// Returns the final state, or `None` if the id was already gone.
    pub fn remove(&mut self, id: ConnectionId, reason: CloseReason) -> Option<ConnectionState> {
        let Entry {
            mut state, reader, ..
        } = self.connections.remove(&id)?;

        if let Some(reader) = reader {
            reader.abort();
        }
        state.mark_closed();

        self.stats.active_connections = self.connections.len();
        match reason {
            CloseReason::Normal => self.stats.normal_closures += 1,
            CloseReason::Disconnected => self.stats.disconnects += 1,
            CloseReason::ProtocolError | CloseReason::WriteFailed => {
                self.stats.error_closures += 1
            }
            CloseReason::Local | CloseReason::Shutdown => self.stats.local_closures += 1,
        }

        Some(state)
    }

    /// Get a connection's state
    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionState> {
        self.connections.get(&id).map(|entry| &entry.state)
    }

    /// Get a connection's state mutably
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionState> {
        self.connections.get_mut(&id).map(|entry| &mut entry.state)
    }

    /// Check whether a connection is registered
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connections are registered
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ids of every registered connection
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Ids of connections that completed the handshake and are not closing
    pub fn open_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .connections
            .iter()
            .filter(|(_, entry)| entry.state.is_open())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Get registry statistics
    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }

    /// Write raw bytes regardless of the connection's state
    pub async fn write(&mut self, id: ConnectionId, bytes: &[u8], timeout: Duration) -> Result<()> {
        let entry = self
            .connections
            .get_mut(&id)
            .ok_or_else(|| Error::Connection(format!("unknown connection {}", id)))?;

        let writer = &mut entry.writer;
        let write = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        };

        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(())) => {
                entry.state.record_sent(bytes.len());
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => Err(Error::WriteTimeout { timeout }),
        }
    }

    /// Write to an open connection; returns `Ok(false)` without writing otherwise
    pub async fn send(&mut self, id: ConnectionId, bytes: &[u8], timeout: Duration) -> Result<bool> {
        let open = self.get(id).map_or(false, ConnectionState::is_open);
        if !open {
            return Ok(false);
        }
        self.write(id, bytes, timeout).await?;
        Ok(true)
    }

    /// Write to every open connection, returning the ids whose write failed
    pub async fn broadcast(&mut self, bytes: &[u8], timeout: Duration) -> Vec<ConnectionId> {
        let mut failed = Vec::new();
        for id in self.open_ids() {
            if self.write(id, bytes, timeout).await.is_err() {
                failed.push(id);
            }
        }
        failed
    }
}
