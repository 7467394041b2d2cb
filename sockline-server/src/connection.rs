//! Per-connection protocol state
//!
//! [`ConnectionState`] owns everything the protocol needs to know about one
//! peer: its read buffer, where it is in the handshake, the message being
//! reassembled and whatever the application attached to it. It performs no
//! I/O. Bytes go in through [`ConnectionState::feed`] and come back out as
//! [`ProtocolEvent`]s from [`ConnectionState::poll_event`].

use bytes::{Buf, Bytes, BytesMut};
use sockline_core::error::HandshakeError;
use sockline_core::frame::{self, Decoded, Frame};
use sockline_core::handshake::{self, HandshakeRequest, HandshakeResult};
use sockline_core::protocol::constants::{
    DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_HANDSHAKE_SIZE, DEFAULT_MAX_MESSAGE_SIZE,
};
use sockline_core::{Assembled, Message, MessageAssembler, Opcode, Result};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// Unique, never reused identifier of a connection within one server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for a valid upgrade request
    AwaitingHandshake,
    /// Upgrade response written, frames flow
    Open,
    /// Close frame received, nothing more is processed
    Closing,
    /// Removed from the registry
    Closed,
}

/// Protocol limits applied to every connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Exclusive upper bound on a frame payload
    pub max_frame_size: usize,
    /// Maximum reassembled message size
    pub max_message_size: usize,
    /// Maximum upgrade request size
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_handshake_size: DEFAULT_MAX_HANDSHAKE_SIZE,
        }
    }
}

/// Connection metadata
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Connection accepted time
    pub established_at: Instant,
    /// Last time bytes arrived
    pub last_activity_at: Instant,
    /// Frames decoded
    pub frames_received: u64,
    /// Complete messages delivered
    pub messages_received: u64,
    /// Frames written
    pub frames_sent: u64,
    /// Bytes read
    pub bytes_received: u64,
    /// Bytes written
    pub bytes_sent: u64,
}

impl ConnectionMetadata {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            established_at: now,
            last_activity_at: now,
            frames_received: 0,
            messages_received: 0,
            frames_sent: 0,
            bytes_received: 0,
            bytes_sent: 0,
        }
    }
}

/// Application data attached to a connection
///
/// Values are keyed by name and stored type-erased; reading one back requires
/// naming its type.
#[derive(Default)]
pub struct ExtraData {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl ExtraData {
    /// Store a value, replacing any previous value under the same key
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Get a value if present and of type `T`
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref::<T>()
    }

    /// Get a mutable value if present and of type `T`
    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key)?.downcast_mut::<T>()
    }

    /// Remove a value; returns whether it existed
    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    /// Check whether a key is set
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for ExtraData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Something the protocol layer wants the server to act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// Upgrade accepted; write this response, then call
    /// [`ConnectionState::complete_handshake`]
    HandshakeResponse(Bytes),
    /// Upgrade request rejected; nothing is written
    HandshakeRejected(HandshakeError),
    /// A complete data message arrived
    Message(Message),
    /// Ping received; answer with a pong carrying the same payload
    Ping(Bytes),
    /// Pong received
    Pong(Bytes),
    /// Close frame received; the connection is now closing
    Close {
        /// Status code, if the peer sent one
        code: Option<u16>,
        /// Reason text following the code
        reason: String,
    },
    /// A fragmented message exceeded the size limit and was discarded
    MessageDropped {
        /// Size that triggered the drop
        size: usize,
    },
}

/// Protocol state of one connection
#[derive(Debug)]
pub struct ConnectionState {
    id: ConnectionId,
    remote_addr: SocketAddr,
    state: HandshakeState,
    read_buf: BytesMut,
    assembler: MessageAssembler,
    limits: Limits,
    upgrade_pending: bool,
    request: Option<HandshakeRequest>,
    extra: ExtraData,
    metadata: ConnectionMetadata,
}

impl ConnectionState {
    /// Create the state for a freshly accepted connection
    pub fn new(id: ConnectionId, remote_addr: SocketAddr, limits: Limits) -> Self {
        Self {
            id,
            remote_addr,
            state: HandshakeState::AwaitingHandshake,
            read_buf: BytesMut::new(),
            assembler: MessageAssembler::new(limits.max_message_size),
            limits,
            upgrade_pending: false,
            request: None,
            extra: ExtraData::default(),
            metadata: ConnectionMetadata::new(),
        }
    }

    /// Get the connection id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the peer address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Get the lifecycle state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Check if frames may be sent
    pub fn is_open(&self) -> bool {
        self.state == HandshakeState::Open
    }

    /// The accepted upgrade request
    pub fn request(&self) -> Option<&HandshakeRequest> {
        self.request.as_ref()
    }

    /// Application data attached to the connection
    pub fn extra_data(&self) -> &ExtraData {
        &self.extra
    }

    /// Mutable application data attached to the connection
    pub fn extra_data_mut(&mut self) -> &mut ExtraData {
        &mut self.extra
    }

    /// Get connection metadata
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    /// Bytes received but not yet turned into events
    pub fn buffered_len(&self) -> usize {
        self.read_buf.len()
    }

    /// Append bytes read from the peer
    pub fn feed(&mut self, bytes: &[u8]) {
        self.read_buf.extend_from_slice(bytes);
        self.metadata.bytes_received += bytes.len() as u64;
        self.metadata.last_activity_at = Instant::now();
    }

    /// Account for a frame written to the peer
    pub fn record_sent(&mut self, bytes: usize) {
        self.metadata.frames_sent += 1;
        self.metadata.bytes_sent += bytes as u64;
    }

    /// The upgrade response has been written; start accepting frames
    pub fn complete_handshake(&mut self) {
        if self.upgrade_pending {
            self.upgrade_pending = false;
            self.state = HandshakeState::Open;
        }
    }

    /// Stop processing input
    pub fn mark_closing(&mut self) {
        if self.state != HandshakeState::Closed {
            self.state = HandshakeState::Closing;
        }
        self.assembler.clear();
    }

    /// Final state; the connection is gone
    pub fn mark_closed(&mut self) {
        self.state = HandshakeState::Closed;
        self.assembler.clear();
        self.read_buf.clear();
    }

    /// Take the next event out of the buffered input
    ///
    /// `Ok(None)` means more bytes are needed. An error is a protocol
    /// violation after which the connection must be dropped.
    pub fn poll_event(&mut self) -> Result<Option<ProtocolEvent>> {
        loop {
            match self.state {
                HandshakeState::AwaitingHandshake => return Ok(self.poll_handshake()),
                HandshakeState::Open => {
                    let max = self.limits.max_frame_size as u64;
                    let (frame, consumed) = match frame::decode(&self.read_buf, max)? {
                        Decoded::Complete { frame, consumed } => (frame, consumed),
                        Decoded::Incomplete { .. } => return Ok(None),
                    };
                    self.read_buf.advance(consumed);
                    self.metadata.frames_received += 1;

                    if let Some(event) = self.handle_frame(frame)? {
                        return Ok(Some(event));
                    }
                }
                HandshakeState::Closing | HandshakeState::Closed => return Ok(None),
            }
        }
    }

    fn poll_handshake(&mut self) -> Option<ProtocolEvent> {
        if self.upgrade_pending || self.read_buf.is_empty() {
            return None;
        }

        match handshake::negotiate(&self.read_buf, self.limits.max_handshake_size) {
            HandshakeResult::Success {
                response,
                request,
                consumed,
            } => {
                self.read_buf.advance(consumed);
                self.request = Some(request);
                self.upgrade_pending = true;
                Some(ProtocolEvent::HandshakeResponse(response))
            }
            HandshakeResult::Incomplete => None,
            HandshakeResult::Failure(err) => {
                let rejected = match err {
                    HandshakeError::MissingKey => {
                        handshake::request_len(&self.read_buf).unwrap_or(self.read_buf.len())
                    }
                    HandshakeError::RequestTooLarge { .. } => self.read_buf.len(),
                };
                self.read_buf.advance(rejected);
                Some(ProtocolEvent::HandshakeRejected(err))
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<Option<ProtocolEvent>> {
        let event = match frame.opcode {
            Opcode::Close => {
                let payload = frame.payload;
                if payload.len() == 1 {
                    return Ok(None);
                }
                let (code, reason) = if payload.len() >= 2 {
                    let code = u16::from_be_bytes([payload[0], payload[1]]);
                    (Some(code), String::from_utf8_lossy(&payload[2..]).into_owned())
                } else {
                    (None, String::new())
                };
                self.mark_closing();
                Some(ProtocolEvent::Close { code, reason })
            }
            Opcode::Ping => Some(ProtocolEvent::Ping(frame.payload)),
            Opcode::Pong => Some(ProtocolEvent::Pong(frame.payload)),
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                match self.assembler.push(frame)? {
                    Assembled::Message(message) => {
                        self.metadata.messages_received += 1;
                        Some(ProtocolEvent::Message(message))
                    }
                    Assembled::Pending => None,
                    Assembled::Dropped { size } => Some(ProtocolEvent::MessageDropped { size }),
                }
            }
        };
        Ok(event)
    }
}
