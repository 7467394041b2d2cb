//! WebSocket server implementation
//!
//! [`Server`] ties a configuration and a handler together and runs them on a
//! transport through a [`Multiplexer`].

use crate::config::ServerConfig;
use crate::handler::{BoxedHandler, EchoHandler, Handler};
use crate::multiplexer::Multiplexer;
use sockline_core::error::{ConfigError, Error};
use sockline_core::{Result, Transport};
use std::future::Future;
use std::net::ToSocketAddrs;
use std::time::Duration;

/// WebSocket server
pub struct Server {
    config: ServerConfig,
    handler: BoxedHandler,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("handler", &"<handler>")
            .finish()
    }
}

impl Server {
    /// Create a new server with the given config and handler
    pub fn new(config: ServerConfig, handler: BoxedHandler) -> Self {
        Self { config, handler }
    }

    /// Create a server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve until Ctrl-C
    #[cfg(feature = "tcp-transport")]
    pub async fn serve(self) -> Result<()> {
        self.serve_with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                // Without a signal handler the server can only be stopped externally
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Bind the configured address and serve until `shutdown_signal` completes
    #[cfg(feature = "tcp-transport")]
    pub async fn serve_with_graceful_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let transport =
            sockline_transport_tcp::TcpTransport::bind(self.config.bind_address).await?;
        self.serve_on(transport, shutdown_signal).await
    }

    /// Serve on an already created transport until `shutdown_signal` completes
    pub async fn serve_on<T, F>(self, transport: T, shutdown_signal: F) -> Result<()>
    where
        T: Transport,
        F: Future<Output = ()>,
    {
        self.into_multiplexer(transport)?.run(shutdown_signal).await
    }

    /// Build the event loop without starting it, e.g. to take a
    /// [`ServerHandle`](crate::ServerHandle) first
    pub fn into_multiplexer<T: Transport>(self, transport: T) -> Result<Multiplexer<T, BoxedHandler>> {
        Multiplexer::new(transport, self.handler, self.config)
    }
}

/// Server builder
#[derive(Debug, Clone)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Start from an existing configuration
    pub fn with_config(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Bind to the given address
    pub fn bind<A: ToSocketAddrs>(mut self, addr: A) -> Result<Self> {
        self.config.bind_address = addr.to_socket_addrs()?.next().ok_or_else(|| {
            Error::Config(ConfigError::Validation("Invalid bind address".to_string()))
        })?;
        Ok(self)
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set maximum message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set maximum upgrade request size
    pub fn max_handshake_size(mut self, size: usize) -> Self {
        self.config.max_handshake_size = size;
        self
    }

    /// Set how many bytes are read from a connection at a time
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size;
        self
    }

    /// Set the capacity of the read event queue
    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.event_queue_capacity = capacity;
        self
    }

    /// Set write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    /// Build a server that runs [`EchoHandler`]
    pub fn build(self) -> Result<Server> {
        self.build_with_handler(EchoHandler::new())
    }

    /// Build the server with a custom handler
    pub fn build_with_handler<H: Handler>(self, handler: H) -> Result<Server> {
        self.config.validate()?;
        Ok(Server::new(self.config, Box::new(handler)))
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
