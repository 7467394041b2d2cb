//! Error types for sockline
//!
//! Every failure the protocol layer can report is one of the enums below.
//! Errors are connection-local: the server maps them to a close code and drops
//! the offending connection, nothing here is meant to bring the process down.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for sockline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol violations detected above the frame layer
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Frame decoding errors
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Upgrade handshake errors
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// The transport will not yield any more connections
    #[error("Transport closed")]
    TransportClosed,

    /// A write did not complete in time
    #[error("Write timed out after {timeout:?}")]
    WriteTimeout {
        /// The configured write timeout
        timeout: Duration,
    },
}

impl Error {
    /// Close code to send to the peer when this error terminates a connection
    pub fn close_code(&self) -> CloseCode {
        match self {
            Error::Frame(FrameError::TooLarge { .. }) => CloseCode::TooBig,
            Error::Protocol(ProtocolError::InvalidUtf8) => CloseCode::InvalidPayload,
            Error::Protocol(_) | Error::Frame(_) | Error::Handshake(_) => CloseCode::ProtocolError,
            _ => CloseCode::Internal,
        }
    }
}

/// Violations of the message-level rules of RFC 6455
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Continuation frame without a fragmented message in progress
    #[error("Continuation frame without an open fragmented message")]
    UnexpectedContinuation,

    /// Text message payload is not valid UTF-8
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,
}

/// Frame parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Opcode outside the set defined by RFC 6455
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// RSV1-3 set while no extension is negotiated
    #[error("Reserved bits set in frame")]
    ReservedBitsSet,

    /// Control frame with FIN cleared
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Declared payload length at or above the configured maximum
    #[error("Frame too large: {size} bytes (max: {max})")]
    TooLarge {
        /// Declared payload length
        size: u64,
        /// Configured maximum (exclusive)
        max: u64,
    },
}

/// Upgrade handshake errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// `Sec-WebSocket-Key` absent or empty
    #[error("Missing Sec-WebSocket-Key header")]
    MissingKey,

    /// Header block grew past the configured limit without terminating
    #[error("Handshake request too large: {size} bytes (max: {max})")]
    RequestTooLarge {
        /// Bytes buffered so far
        size: usize,
        /// Configured limit
        max: usize,
    },
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue {
        /// Offending field
        field: String,
        /// Offending value
        value: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// WebSocket close codes as defined in RFC 6455 section 7.4
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Normal closure
    Normal,
    /// Going away
    Away,
    /// Protocol error
    ProtocolError,
    /// Unsupported data
    Unsupported,
    /// No status received
    NoStatus,
    /// Abnormal closure
    Abnormal,
    /// Invalid frame payload data
    InvalidPayload,
    /// Policy violation
    PolicyViolation,
    /// Message too big
    TooBig,
    /// Internal server error
    Internal,
    /// Any other code, including the application range 3000-4999
    Other(u16),
}

impl CloseCode {
    /// Get the numeric value of the close code
    pub fn code(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::TooBig => 1009,
            CloseCode::Internal => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    /// Codes that must never appear on the wire
    pub fn is_reserved(&self) -> bool {
        matches!(self, CloseCode::NoStatus | CloseCode::Abnormal)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::TooBig,
            1011 => CloseCode::Internal,
            other => CloseCode::Other(other),
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloseCode::Normal => "normal",
            CloseCode::Away => "going away",
            CloseCode::ProtocolError => "protocol error",
            CloseCode::Unsupported => "unsupported data",
            CloseCode::NoStatus => "no status",
            CloseCode::Abnormal => "abnormal",
            CloseCode::InvalidPayload => "invalid payload",
            CloseCode::PolicyViolation => "policy violation",
            CloseCode::TooBig => "message too big",
            CloseCode::Internal => "internal error",
            CloseCode::Other(_) => "other",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_conversion() {
        assert_eq!(CloseCode::from(1000), CloseCode::Normal);
        assert_eq!(CloseCode::from(3000), CloseCode::Other(3000));
        assert_eq!(CloseCode::from(1009).code(), 1009);
        assert_eq!(CloseCode::Other(4001).code(), 4001);
        assert!(CloseCode::Abnormal.is_reserved());
    }

    #[test]
    fn test_close_code_display() {
        assert_eq!(CloseCode::Normal.to_string(), "normal (1000)");
        assert_eq!(CloseCode::Other(4000).to_string(), "other (4000)");
    }

    #[test]
    fn test_error_close_codes() {
        let too_large = Error::Frame(FrameError::TooLarge { size: 10, max: 5 });
        assert_eq!(too_large.close_code(), CloseCode::TooBig);

        let utf8 = Error::Protocol(ProtocolError::InvalidUtf8);
        assert_eq!(utf8.close_code(), CloseCode::InvalidPayload);

        let opcode = Error::from(FrameError::InvalidOpcode(0x3));
        assert_eq!(opcode.close_code(), CloseCode::ProtocolError);
        assert!(opcode.to_string().contains("0x3"));
    }
}
