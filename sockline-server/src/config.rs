//! Server configuration
//!
//! This module provides configuration options for the WebSocket server.

use crate::connection::Limits;
use sockline_core::error::{ConfigError, Error};
use sockline_core::protocol::constants::{
    DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_HANDSHAKE_SIZE, DEFAULT_MAX_MESSAGE_SIZE,
    DEFAULT_READ_CHUNK_SIZE,
};
use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub bind_address: SocketAddr,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Exclusive upper bound on a frame payload, in bytes
    pub max_frame_size: usize,
    /// Maximum reassembled message size in bytes
    pub max_message_size: usize,
    /// Maximum size of the upgrade request
    pub max_handshake_size: usize,
    /// Bytes read from a connection at a time
    pub read_chunk_size: usize,
    /// Capacity of the queue between reader pumps and the event loop
    pub event_queue_capacity: usize,
    /// Deadline for a single frame write
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 10_000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_handshake_size: DEFAULT_MAX_HANDSHAKE_SIZE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            event_queue_capacity: 1024,
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> sockline_core::Result<()> {
        let non_zero = [
            ("max_connections", self.max_connections),
            ("max_frame_size", self.max_frame_size),
            ("max_message_size", self.max_message_size),
            ("max_handshake_size", self.max_handshake_size),
            ("read_chunk_size", self.read_chunk_size),
            ("event_queue_capacity", self.event_queue_capacity),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(Error::Config(ConfigError::Validation(format!(
                    "{} must be greater than 0",
                    field
                ))));
            }
        }

        if self.max_message_size < self.max_frame_size {
            return Err(Error::Config(ConfigError::Validation(
                "max_message_size must be greater than or equal to max_frame_size".to_string(),
            )));
        }

        if self.write_timeout.is_zero() {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "write_timeout".to_string(),
                value: format!("{:?}", self.write_timeout),
            }));
        }

        Ok(())
    }

    /// Per-connection protocol limits derived from this configuration
    pub fn limits(&self) -> Limits {
        Limits {
            max_frame_size: self.max_frame_size,
            max_message_size: self.max_message_size,
            max_handshake_size: self.max_handshake_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_connections, 10_000);
        assert_eq!(config.bind_address.port(), 8080);
        assert_eq!(config.read_chunk_size, 2048);
        assert_eq!(config.max_frame_size, 1024 * 1024);
    }

    #[test]
    fn test_server_config_validation() {
        let mut config = ServerConfig::default();
        config.max_connections = 0;
        assert!(config.validate().is_err());

        config.max_connections = 1000;
        config.max_frame_size = 0;
        assert!(config.validate().is_err());

        config.max_frame_size = 1024;
        config.max_message_size = 512;
        assert!(config.validate().is_err());

        config.max_message_size = 4096;
        config.read_chunk_size = 0;
        assert!(config.validate().is_err());

        config.read_chunk_size = 2048;
        config.write_timeout = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("write_timeout"));
    }

    #[test]
    fn test_limits() {
        let config = ServerConfig {
            max_frame_size: 100,
            max_message_size: 200,
            max_handshake_size: 300,
            ..ServerConfig::default()
        };

        let limits = config.limits();
        assert_eq!(limits.max_frame_size, 100);
        assert_eq!(limits.max_message_size, 200);
        assert_eq!(limits.max_handshake_size, 300);
    }
}
