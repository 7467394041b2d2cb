//! WebSocket protocol constants and utilities
//!
//! This module contains the protocol definitions from RFC 6455 that the rest
//! of the crate is built on: opcodes, header bits and default limits.

use std::fmt;

/// WebSocket opcodes as defined in RFC 6455 Section 5.2
///
/// Only the six defined opcodes are representable; reserved values are
/// rejected when a frame is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Close frame
    Close = 0x8,
    /// Ping frame
    Ping = 0x9,
    /// Pong frame
    Pong = 0xA,
}

impl Opcode {
    /// Create an Opcode from the low nibble of a frame's first byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    /// Get the numeric value of the opcode
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Control opcodes have the high bit of the nibble set
    pub fn is_control(&self) -> bool {
        self.value() & 0x8 != 0
    }

    /// Check if this is a data opcode
    pub fn is_data(&self) -> bool {
        !self.is_control()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Continuation => "continuation",
            Opcode::Text => "text",
            Opcode::Binary => "binary",
            Opcode::Close => "close",
            Opcode::Ping => "ping",
            Opcode::Pong => "pong",
        };
        f.write_str(name)
    }
}

/// WebSocket protocol constants
pub mod constants {
    /// GUID appended to the client key when computing the accept token
    pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

    /// Key header the handshake requires
    pub const HEADER_SEC_WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";

    /// Exclusive upper bound on a single frame's payload
    pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024; // 1 MiB

    /// Upper bound on a reassembled fragmented message
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024; // 1 MiB

    /// Maximum buffered handshake request
    pub const DEFAULT_MAX_HANDSHAKE_SIZE: usize = 8192; // 8KB

    /// Bytes pulled from a connection per read
    pub const DEFAULT_READ_CHUNK_SIZE: usize = 2048;

    /// End of the HTTP header block
    pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
}

/// Frame header bit positions and masks
pub mod frame {
    /// FIN bit position
    pub const FIN_BIT: u8 = 0x80;

    /// RSV1, RSV2 and RSV3 together
    pub const RSV_BITS: u8 = 0x70;

    /// Opcode mask
    pub const OPCODE_MASK: u8 = 0x0F;

    /// MASK bit position
    pub const MASK_BIT: u8 = 0x80;

    /// Payload length mask for 7-bit length
    pub const PAYLOAD_LEN_MASK: u8 = 0x7F;

    /// Extended payload length (16-bit) marker
    pub const PAYLOAD_LEN_16: u8 = 126;

    /// Extended payload length (64-bit) marker
    pub const PAYLOAD_LEN_64: u8 = 127;

    /// Masking key length
    pub const MASKING_KEY_LEN: usize = 4;

    /// Largest header: 2 bytes + 8 byte length + 4 byte key
    pub const MAX_HEADER_LEN: usize = 14;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_conversion() {
        assert_eq!(Opcode::from_u8(0x1), Some(Opcode::Text));
        assert_eq!(Opcode::from_u8(0xA), Some(Opcode::Pong));
        assert_eq!(Opcode::from_u8(0x3), None);
        assert_eq!(Opcode::from_u8(0xB), None);
        assert_eq!(Opcode::Text.value(), 0x1);
    }

    #[test]
    fn test_opcode_classes() {
        for op in [Opcode::Close, Opcode::Ping, Opcode::Pong] {
            assert!(op.is_control(), "{op} should be control");
        }
        for op in [Opcode::Continuation, Opcode::Text, Opcode::Binary] {
            assert!(op.is_data(), "{op} should be data");
        }
    }
}
