//! Prelude module with common imports
//!
//! Re-exports what a typical server binary or handler needs.

// Server types
pub use crate::config::ServerConfig;
pub use crate::connection::{ConnectionId, ExtraData, HandshakeState};
pub use crate::dispatch::Session;
pub use crate::handler::{BoxedHandler, EchoHandler, Handler};
pub use crate::multiplexer::{Multiplexer, ServerHandle};
pub use crate::server::{Server, ServerBuilder};

// Re-export core types
pub use sockline_core::prelude::*;
