//! TCP transport for sockline
//!
//! Plugs a tokio [`TcpListener`](tokio::net::TcpListener) into the server's
//! [`Transport`](sockline_core::Transport) abstraction.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod tcp;

// Re-export TCP transport types
pub use tcp::TcpTransport;

/// Prelude module
pub mod prelude {
    pub use crate::tcp::TcpTransport;
    pub use sockline_core::transport::Transport;
}
