//! Prelude module for sockline core
//!
//! Re-exports the types most code working with frames and messages needs.

pub use crate::error::{CloseCode, Error, Result};
pub use crate::frame::{Decoded, Frame};
pub use crate::handshake::{HandshakeRequest, HandshakeResult};
pub use crate::message::{Assembled, Message, MessageAssembler};
pub use crate::protocol::Opcode;

pub use bytes::{Bytes, BytesMut};

#[cfg(feature = "tokio-runtime")]
pub use crate::transport::{MemoryConnector, MemoryTransport, Transport};

#[cfg(feature = "tokio-runtime")]
pub use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
