//! # sockline core
//!
//! The protocol layer of the sockline WebSocket engine. Everything in here is
//! synchronous and free of I/O except the [`transport`] abstraction:
//!
//! - Error handling and close codes
//! - RFC 6455 frame decoding and encoding
//! - The HTTP upgrade handshake
//! - Reassembly of fragmented messages
//! - Transport layer abstractions

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

// Core modules
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod protocol;
#[cfg(feature = "tokio-runtime")]
pub mod transport;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use error::{CloseCode, Error, Result};
pub use frame::{Decoded, Frame};
pub use handshake::{HandshakeRequest, HandshakeResult};
pub use message::{Assembled, Message, MessageAssembler};
pub use protocol::Opcode;
#[cfg(feature = "tokio-runtime")]
pub use transport::Transport;
