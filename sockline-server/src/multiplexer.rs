//! The server event loop
//!
//! One task owns the registry and the handler and does all protocol work.
//! It waits on four sources at once: the transport's accept, a FIFO queue of
//! chunks read by per-connection reader tasks, commands from
//! [`ServerHandle`]s, and the shutdown signal. Reader tasks only read; they
//! push each chunk onto the bounded queue and wait for room before reading
//! again, so a busy peer cannot crowd out the others.

use crate::config::ServerConfig;
use crate::connection::ConnectionId;
use crate::dispatch::Dispatcher;
use crate::handler::Handler;
use crate::logging::{log_debug, log_info, log_warn};
use crate::registry::{CloseReason, ConnectionRegistry, RegistryStats};
use bytes::Bytes;
use sockline_core::frame::{encode, Frame};
use sockline_core::{CloseCode, Error, Message, Result, Transport};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};

/// A chunk of input, or the end of it, from one connection
#[derive(Debug)]
pub struct ReadEvent {
    /// Connection the read belongs to
    pub id: ConnectionId,
    /// What the read produced
    pub outcome: ReadOutcome,
}

/// Result of a single read
#[derive(Debug)]
pub enum ReadOutcome {
    /// Bytes arrived
    Data(Bytes),
    /// The peer closed its end (zero-byte read)
    Closed,
    /// The read failed
    Failed(io::Error),
}

/// Read from `reader` until EOF or error, forwarding every chunk to `events`
///
/// Each read asks for at most `chunk_size` bytes. The task ends after
/// reporting EOF or an error, or once the event loop is gone.
pub async fn read_pump<R>(
    id: ConnectionId,
    mut reader: R,
    chunk_size: usize,
    events: mpsc::Sender<ReadEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; chunk_size];
    loop {
        let outcome = match reader.read(&mut buf).await {
            Ok(0) => ReadOutcome::Closed,
            Ok(n) => ReadOutcome::Data(Bytes::copy_from_slice(&buf[..n])),
            Err(err) => ReadOutcome::Failed(err),
        };
        let last = !matches!(outcome, ReadOutcome::Data(_));

        if events.send(ReadEvent { id, outcome }).await.is_err() || last {
            break;
        }
    }
}

#[derive(Debug)]
enum Command {
    Send {
        id: ConnectionId,
        message: Message,
        reply: oneshot::Sender<bool>,
    },
    Broadcast {
        message: Message,
        reply: oneshot::Sender<usize>,
    },
    Close {
        id: ConnectionId,
        code: CloseCode,
        reply: oneshot::Sender<bool>,
    },
    ConnectionCount {
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<RegistryStats>,
    },
}

/// Cloneable handle for talking to a running server from other tasks
///
/// Calls are answered by the event loop, so they must not be awaited from
/// inside a [`Handler`] callback; use the callback's
/// [`Session`](crate::Session) there instead.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    commands: mpsc::Sender<Command>,
}

impl ServerHandle {
    async fn request<R>(&self, command: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::Connection("server is not running".to_string()))?;
        response
            .await
            .map_err(|_| Error::Connection("server stopped before replying".to_string()))
    }

    /// Send a text message; returns whether the connection was open
    pub async fn send_text(&self, id: ConnectionId, text: impl Into<String>) -> Result<bool> {
        let message = Message::text(text);
        self.request(|reply| Command::Send { id, message, reply })
            .await
    }

    /// Send a binary message; returns whether the connection was open
    pub async fn send_binary(&self, id: ConnectionId, data: impl Into<Bytes>) -> Result<bool> {
        let message = Message::binary(data);
        self.request(|reply| Command::Send { id, message, reply })
            .await
    }

    /// Send a text message to every open connection; returns how many got it
    pub async fn broadcast_text(&self, text: impl Into<String>) -> Result<usize> {
        let message = Message::text(text);
        self.request(|reply| Command::Broadcast { message, reply })
            .await
    }

    /// Send a binary message to every open connection; returns how many got it
    pub async fn broadcast_binary(&self, data: impl Into<Bytes>) -> Result<usize> {
        let message = Message::binary(data);
        self.request(|reply| Command::Broadcast { message, reply })
            .await
    }

    /// Close a connection with `code`; returns whether it existed
    pub async fn close(&self, id: ConnectionId, code: CloseCode) -> Result<bool> {
        self.request(|reply| Command::Close { id, code, reply })
            .await
    }

    /// Number of registered connections
    pub async fn connection_count(&self) -> Result<usize> {
        self.request(|reply| Command::ConnectionCount { reply })
            .await
    }

    /// Registry statistics
    pub async fn stats(&self) -> Result<RegistryStats> {
        self.request(|reply| Command::Stats { reply }).await
    }
}

enum Step<S> {
    Shutdown,
    Accepted(Result<(S, SocketAddr)>),
    Read(ReadEvent),
    Command(Command),
}

/// Single-task WebSocket event loop over a [`Transport`]
pub struct Multiplexer<T: Transport, H> {
    transport: T,
    registry: ConnectionRegistry,
    dispatcher: Dispatcher<H>,
    config: ServerConfig,
    events_tx: mpsc::Sender<ReadEvent>,
    events_rx: mpsc::Receiver<ReadEvent>,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
}

impl<T: Transport, H> std::fmt::Debug for Multiplexer<T, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("local_addr", &self.transport.local_addr().ok())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

impl<T: Transport, H: Handler> Multiplexer<T, H> {
    /// Create an event loop; the configuration is validated
    pub fn new(transport: T, handler: H, config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity);
        let (commands_tx, commands_rx) = mpsc::channel(config.event_queue_capacity);

        Ok(Self {
            transport,
            registry: ConnectionRegistry::new(),
            dispatcher: Dispatcher::new(handler, config.write_timeout),
            config,
            events_tx,
            events_rx,
            commands_tx,
            commands_rx,
        })
    }

    /// Get a handle for use from other tasks
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            commands: self.commands_tx.clone(),
        }
    }

    /// Local address of the underlying transport
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Run until `shutdown` completes
    ///
    /// On shutdown every connection is sent a `1001` close frame and dropped.
    /// If the transport stops yielding connections, existing connections keep
    /// being served until shutdown.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut accepting = true;

        if let Ok(addr) = self.transport.local_addr() {
            log_info!("WebSocket server listening on {}", addr);
        }

        loop {
            let step = tokio::select! {
                _ = &mut shutdown => Step::Shutdown,
                accepted = self.transport.accept(), if accepting => Step::Accepted(accepted),
                Some(event) = self.events_rx.recv() => Step::Read(event),
                Some(command) = self.commands_rx.recv() => Step::Command(command),
                else => Step::Shutdown,
            };

            match step {
                Step::Shutdown => break,
                Step::Accepted(Ok((stream, peer))) => self.on_accept(stream, peer),
                Step::Accepted(Err(Error::TransportClosed)) => {
                    log_info!("transport closed, no longer accepting connections");
                    accepting = false;
                }
                Step::Accepted(Err(err)) => {
                    log_warn!("failed to accept connection: {}", err);
                }
                Step::Read(event) => self.on_read(event).await,
                Step::Command(command) => self.on_command(command).await,
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn on_accept(&mut self, stream: T::Stream, peer: SocketAddr) {
        if self.registry.len() >= self.config.max_connections {
            log_warn!(
                "connection limit ({}) reached, rejecting {}",
                self.config.max_connections,
                peer
            );
            #[cfg(feature = "metrics")]
            metrics::counter!("sockline_connections_rejected_total").increment(1);
            return;
        }

        let (reader, writer) = tokio::io::split(stream);
        let id = self
            .registry
            .register(peer, Box::new(writer), self.config.limits());
        let pump = tokio::spawn(read_pump(
            id,
            reader,
            self.config.read_chunk_size,
            self.events_tx.clone(),
        ));
        self.registry.attach_reader(id, pump);

        log_debug!("accepted connection {} from {}", id, peer);
        #[cfg(feature = "metrics")]
        {
            metrics::counter!("sockline_connections_accepted_total").increment(1);
            metrics::gauge!("sockline_connections_active").set(self.registry.len() as f64);
        }
    }

    async fn on_read(&mut self, event: ReadEvent) {
        let ReadEvent { id, outcome } = event;
        match outcome {
            ReadOutcome::Data(bytes) => {
                #[cfg(feature = "metrics")]
                metrics::counter!("sockline_bytes_received_total").increment(bytes.len() as u64);
                self.dispatcher
                    .on_bytes(&mut self.registry, id, &bytes)
                    .await;
            }
            ReadOutcome::Closed => {
                if self.registry.remove(id, CloseReason::Disconnected).is_some() {
                    log_debug!("connection {} closed by peer without a close frame", id);
                }
            }
            ReadOutcome::Failed(err) => {
                if self.registry.remove(id, CloseReason::Disconnected).is_some() {
                    log_debug!("read from connection {} failed: {}", id, err);
                }
            }
        }

        #[cfg(feature = "metrics")]
        metrics::gauge!("sockline_connections_active").set(self.registry.len() as f64);
    }

    async fn on_command(&mut self, command: Command) {
        let timeout = self.config.write_timeout;
        match command {
            Command::Send { id, message, reply } => {
                let frame = message.to_frame().to_bytes();
                let sent = match self.registry.send(id, &frame, timeout).await {
                    Ok(sent) => sent,
                    Err(err) => {
                        log_debug!("send to connection {} failed: {}", id, err);
                        self.registry.remove(id, CloseReason::WriteFailed);
                        false
                    }
                };
                let _ = reply.send(sent);
            }
            Command::Broadcast { message, reply } => {
                let frame = encode(message.opcode(), message.as_bytes());
                let open = self.registry.open_ids().len();
                let failed = self.registry.broadcast(&frame, timeout).await;
                for id in &failed {
                    self.registry.remove(*id, CloseReason::WriteFailed);
                }
                let _ = reply.send(open - failed.len());
            }
            Command::Close { id, code, reply } => {
                let existed = self.close_connection(id, code, CloseReason::Local).await;
                let _ = reply.send(existed);
            }
            Command::ConnectionCount { reply } => {
                let _ = reply.send(self.registry.len());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.registry.stats().clone());
            }
        }
    }

    async fn close_connection(&mut self, id: ConnectionId, code: CloseCode, reason: CloseReason) -> bool {
        let frame = Frame::close(Some(code.code()), "").to_bytes();
        if let Err(err) = self
            .registry
            .send(id, &frame, self.config.write_timeout)
            .await
        {
            log_debug!("failed to send close frame to {}: {}", id, err);
        }
        self.registry.remove(id, reason).is_some()
    }

    async fn shutdown(&mut self) {
        let ids = self.registry.ids();
        log_info!("shutting down, closing {} connections", ids.len());

        for id in ids {
            self.close_connection(id, CloseCode::Away, CloseReason::Shutdown)
                .await;
        }
    }
}
