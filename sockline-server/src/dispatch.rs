//! Routing protocol events to the handler
//!
//! The [`Dispatcher`] turns raw bytes read from a connection into the
//! protocol's side effects (upgrade responses, pongs, close replies) and into
//! [`Handler`] callbacks. Callbacks receive a [`Session`], the handler's only
//! way to reach connections.

use crate::connection::{ConnectionId, ExtraData, ProtocolEvent};
use crate::handler::Handler;
use crate::logging::{log_debug, log_trace, log_warn};
use crate::registry::{CloseReason, ConnectionRegistry};
use bytes::Bytes;
use sockline_core::error::HandshakeError;
use sockline_core::frame::{encode, Frame};
use sockline_core::handshake::HandshakeRequest;
use sockline_core::{CloseCode, Error, Opcode, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// A handler's view of the server during one callback
///
/// Sends to connections that are not open are silently skipped. A failed
/// send returns the error and the affected connection is dropped once the
/// callback returns.
#[derive(Debug)]
pub struct Session<'a> {
    id: ConnectionId,
    registry: &'a mut ConnectionRegistry,
    write_timeout: Duration,
    failed: Vec<ConnectionId>,
    closed: Vec<ConnectionId>,
}

impl<'a> Session<'a> {
    pub(crate) fn new(
        id: ConnectionId,
        registry: &'a mut ConnectionRegistry,
        write_timeout: Duration,
    ) -> Self {
        Self {
            id,
            registry,
            write_timeout,
            failed: Vec::new(),
            closed: Vec::new(),
        }
    }

    /// Id of the connection the event came from
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Peer address of the current connection
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.registry.get(self.id).map(|state| state.remote_addr())
    }

    /// The upgrade request of the current connection
    pub fn request(&self) -> Option<&HandshakeRequest> {
        self.registry.get(self.id).and_then(|state| state.request())
    }

    /// Application data attached to the current connection
    pub fn extra_data(&self) -> Option<&ExtraData> {
        self.registry.get(self.id).map(|state| state.extra_data())
    }

    /// Mutable application data attached to the current connection
    pub fn extra_data_mut(&mut self) -> Option<&mut ExtraData> {
        self.registry
            .get_mut(self.id)
            .map(|state| state.extra_data_mut())
    }

    /// Number of registered connections, including ones still handshaking
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Ids of all open connections
    pub fn open_connections(&self) -> Vec<ConnectionId> {
        self.registry.open_ids()
    }

    /// Send a text message to the current connection
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send_frame(self.id, encode(Opcode::Text, text.as_bytes()))
            .await
    }

    /// Send a binary message to the current connection
    pub async fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.send_frame(self.id, encode(Opcode::Binary, data)).await
    }

    /// Send a text message to another connection
    pub async fn send_text_to(&mut self, id: ConnectionId, text: &str) -> Result<()> {
        self.send_frame(id, encode(Opcode::Text, text.as_bytes()))
            .await
    }

    /// Send a binary message to another connection
    pub async fn send_binary_to(&mut self, id: ConnectionId, data: &[u8]) -> Result<()> {
        self.send_frame(id, encode(Opcode::Binary, data)).await
    }

    /// Send a text message to every open connection, this one included
    ///
    /// Returns how many connections it was written to.
    pub async fn broadcast_text(&mut self, text: &str) -> usize {
        self.broadcast_frame(encode(Opcode::Text, text.as_bytes()))
            .await
    }

    /// Send a binary message to every open connection, this one included
    pub async fn broadcast_binary(&mut self, data: &[u8]) -> usize {
        self.broadcast_frame(encode(Opcode::Binary, data)).await
    }

    /// Close the current connection with `code` once the callback returns
    ///
    /// `on_close` is not invoked for server-initiated closes.
    pub async fn close(&mut self, code: CloseCode) -> Result<()> {
        let frame = Frame::close(Some(code.code()), "").to_bytes();
        let sent = self.send_frame(self.id, frame).await;
        if !self.closed.contains(&self.id) {
            self.closed.push(self.id);
        }
        sent
    }

    async fn send_frame(&mut self, id: ConnectionId, frame: Bytes) -> Result<()> {
        if self.failed.contains(&id) || self.closed.contains(&id) {
            return Ok(());
        }
        match self.registry.send(id, &frame, self.write_timeout).await {
            Ok(_) => Ok(()),
            Err(err) => {
                self.failed.push(id);
                Err(err)
            }
        }
    }

    async fn broadcast_frame(&mut self, frame: Bytes) -> usize {
        let mut delivered = 0;
        for id in self.registry.open_ids() {
            if self.failed.contains(&id) || self.closed.contains(&id) {
                continue;
            }
            match self.registry.write(id, &frame, self.write_timeout).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    log_debug!("broadcast to connection {} failed: {}", id, err);
                    self.failed.push(id);
                }
            }
        }
        delivered
    }

    fn finish(self) -> (Vec<ConnectionId>, Vec<ConnectionId>) {
        (self.failed, self.closed)
    }
}

enum Callback {
    Connect,
    Text(String),
    Binary(Bytes),
    Pong(Bytes),
    Close(Option<u16>, String),
}

/// Feeds connection input through the protocol and into a [`Handler`]
#[derive(Debug)]
pub struct Dispatcher<H> {
    handler: H,
    write_timeout: Duration,
}

impl<H: Handler> Dispatcher<H> {
    /// Create a dispatcher around a handler
    pub fn new(handler: H, write_timeout: Duration) -> Self {
        Self {
            handler,
            write_timeout,
        }
    }

    /// Get the handler
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Get the handler mutably
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Process bytes read from connection `id`
    ///
    /// Every event the bytes complete is handled before this returns, in
    /// arrival order. Unknown ids are ignored.
    pub async fn on_bytes(&mut self, registry: &mut ConnectionRegistry, id: ConnectionId, bytes: &[u8]) {
        match registry.get_mut(id) {
            Some(state) => state.feed(bytes),
            None => return,
        }

        loop {
            let polled = match registry.get_mut(id) {
                Some(state) => state.poll_event(),
                None => return,
            };

            match polled {
                Ok(Some(event)) => {
                    if !self.on_event(registry, id, event).await {
                        return;
                    }
                }
                Ok(None) => return,
                Err(err) => {
                    self.fail(registry, id, err).await;
                    return;
                }
            }
        }
    }

    /// Handle one event; returns whether the connection is still registered
    async fn on_event(&mut self, registry: &mut ConnectionRegistry, id: ConnectionId, event: ProtocolEvent) -> bool {
        match event {
            ProtocolEvent::HandshakeResponse(response) => {
                if let Err(err) = registry.write(id, &response, self.write_timeout).await {
                    log_debug!("failed to write upgrade response to {}: {}", id, err);
                    registry.remove(id, CloseReason::WriteFailed);
                    return false;
                }
                if let Some(state) = registry.get_mut(id) {
                    state.complete_handshake();
                }
                log_debug!("connection {} upgraded", id);
                self.invoke(registry, id, Callback::Connect).await;
            }
            ProtocolEvent::HandshakeRejected(HandshakeError::MissingKey) => {
                log_debug!("connection {} sent an upgrade request without a key", id);
            }
            ProtocolEvent::HandshakeRejected(err) => {
                log_warn!("dropping connection {}: {}", id, err);
                registry.remove(id, CloseReason::ProtocolError);
                return false;
            }
            ProtocolEvent::Message(message) => {
                log_trace!("connection {} delivered {}", id, message);
                #[cfg(feature = "metrics")]
                metrics::counter!("sockline_messages_received_total").increment(1);

                let callback = match message {
                    sockline_core::Message::Text(text) => Callback::Text(text),
                    sockline_core::Message::Binary(data) => Callback::Binary(data),
                };
                self.invoke(registry, id, callback).await;
            }
            ProtocolEvent::Ping(payload) => {
                let pong = encode(Opcode::Pong, &payload);
                if let Err(err) = registry.send(id, &pong, self.write_timeout).await {
                    log_debug!("failed to answer ping on {}: {}", id, err);
                    registry.remove(id, CloseReason::WriteFailed);
                    return false;
                }
            }
            ProtocolEvent::Pong(payload) => {
                self.invoke(registry, id, Callback::Pong(payload)).await;
            }
            ProtocolEvent::Close { code, reason } => {
                log_debug!("connection {} closed by peer ({:?})", id, code);
                let reply = encode(Opcode::Close, &[]);
                if let Err(err) = registry.write(id, &reply, self.write_timeout).await {
                    log_debug!("failed to answer close on {}: {}", id, err);
                }
                self.invoke(registry, id, Callback::Close(code, reason)).await;
                registry.remove(id, CloseReason::Normal);
                return false;
            }
            ProtocolEvent::MessageDropped { size } => {
                log_warn!("connection {} exceeded the message size limit ({} bytes)", id, size);
            }
        }
        registry.contains(id)
    }

    /// Drop a connection that violated the protocol
    async fn fail(&mut self, registry: &mut ConnectionRegistry, id: ConnectionId, err: Error) {
        let code = err.close_code();
        log_debug!("protocol error on connection {}: {} (closing with {})", id, err, code);

        let frame = Frame::close(Some(code.code()), "").to_bytes();
        if let Err(err) = registry.write(id, &frame, self.write_timeout).await {
            log_debug!("failed to send close frame to {}: {}", id, err);
        }
        registry.remove(id, CloseReason::ProtocolError);
    }

    async fn invoke(&mut self, registry: &mut ConnectionRegistry, id: ConnectionId, callback: Callback) {
        let mut session = Session::new(id, registry, self.write_timeout);

        let result = match callback {
            Callback::Connect => self.handler.on_connect(&mut session).await,
            Callback::Text(text) => self.handler.on_text(&mut session, text).await,
            Callback::Binary(data) => self.handler.on_binary(&mut session, data).await,
            Callback::Pong(payload) => self.handler.on_pong(&mut session, payload).await,
            Callback::Close(code, reason) => self.handler.on_close(&mut session, code, reason).await,
        };
        if let Err(err) = result {
            log_warn!("handler error on connection {}: {}", id, err);
        }

        let (failed, closed) = session.finish();
        for id in failed {
            if registry.remove(id, CloseReason::WriteFailed).is_some() {
                log_debug!("dropped connection {} after a failed write", id);
            }
        }
        for id in closed {
            registry.remove(id, CloseReason::Local);
        }
    }
}
