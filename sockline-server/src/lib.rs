//! sockline server
//!
//! A WebSocket server that runs every connection on a single event loop.
//! Handlers see complete messages; the loop takes care of the upgrade
//! handshake, fragmentation, pings and the close handshake.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sockline_server::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> sockline_core::Result<()> {
//!     let server = Server::builder()
//!         .bind("0.0.0.0:8080")?
//!         .max_connections(10_000)
//!         .build()?;
//!
//!     server.serve().await?;
//!
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

// Public modules
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod handler;
pub mod logging;
pub mod multiplexer;
pub mod registry;
pub mod server;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use config::ServerConfig;
pub use connection::{
    ConnectionId, ConnectionMetadata, ConnectionState, ExtraData, HandshakeState, Limits,
    ProtocolEvent,
};
pub use dispatch::{Dispatcher, Session};
pub use handler::{BoxedHandler, EchoHandler, Handler};
pub use logging::init_logging;
pub use multiplexer::{Multiplexer, ServerHandle};
pub use registry::{CloseReason, ConnectionRegistry, RegistryStats};
pub use server::{Server, ServerBuilder};
