//! WebSocket frame parsing and serialization
//!
//! Stateless codec for the RFC 6455 wire format. [`decode`] looks at the front
//! of a byte buffer and either produces one frame (reporting how many bytes it
//! used), asks for more bytes, or rejects the frame. Buffering across reads is
//! the caller's job. [`encode`] produces the unmasked frames a server sends.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use crate::{
    error::FrameError,
    protocol::{frame::*, Opcode},
};
use bytes::{BufMut, Bytes, BytesMut};

/// Represents a WebSocket frame according to RFC 6455
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Indicates if this is the final frame in a message
    pub fin: bool,
    /// Frame opcode
    pub opcode: Opcode,
    /// Masking key, present iff the MASK bit is set
    pub mask: Option<[u8; 4]>,
    /// Payload data, always unmasked
    pub payload: Bytes,
}

impl Frame {
    /// Create a final, unmasked frame with the given opcode and payload
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    /// Create a continuation frame
    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Continuation, payload)
    }

    /// Create a text frame
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    /// Create a binary frame
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    /// Create a close frame; the reason is only sent along with a code
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let mut payload = BytesMut::new();

        if let Some(code) = code {
            payload.put_u16(code);
            payload.put_slice(reason.as_bytes());
        }

        Self::new(Opcode::Close, payload.freeze())
    }

    /// Create a ping frame
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    /// Create a pong frame
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    /// Set the FIN bit
    pub fn fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Mask the frame with `key` when written (client-to-server frames)
    pub fn masked(mut self, key: [u8; 4]) -> Self {
        self.mask = Some(key);
        self
    }

    /// Check if this is a control frame
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    /// Check if the MASK bit is set
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Get the payload length
    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Serialize the frame to bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MAX_HEADER_LEN + self.payload.len());
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Write the frame to a buffer, masking the payload if a key is set
    pub fn write_to(&self, buf: &mut BytesMut) {
        write_header(buf, self.fin, self.opcode, self.mask, self.payload.len());

        let start = buf.len();
        buf.put_slice(&self.payload);
        if let Some(key) = self.mask {
            apply_mask(&mut buf[start..], key);
        }
    }
}

/// Outcome of a successful [`decode`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A whole frame was available
    Complete {
        /// The decoded, unmasked frame
        frame: Frame,
        /// Bytes of the input the frame occupied
        consumed: usize,
    },
    /// The buffer holds only part of a frame
    Incomplete {
        /// Lower bound on the bytes still missing
        needed: usize,
    },
}

/// Decode one frame from the front of `buf`
///
/// Payloads declaring a length of `max_payload` or more are rejected as soon
/// as the length field has arrived, before any payload is buffered.
pub fn decode(buf: &[u8], max_payload: u64) -> Result<Decoded, FrameError> {
    if buf.len() < 2 {
        return Ok(Decoded::Incomplete {
            needed: 2 - buf.len(),
        });
    }

    let first_byte = buf[0];
    if first_byte & RSV_BITS != 0 {
        return Err(FrameError::ReservedBitsSet);
    }

    let fin = first_byte & FIN_BIT != 0;
    let opcode = Opcode::from_u8(first_byte & OPCODE_MASK)
        .ok_or(FrameError::InvalidOpcode(first_byte & OPCODE_MASK))?;
    if opcode.is_control() && !fin {
        return Err(FrameError::FragmentedControlFrame);
    }

    let second_byte = buf[1];
    let masked = second_byte & MASK_BIT != 0;

    let (payload_len, mut offset) = match second_byte & PAYLOAD_LEN_MASK {
        PAYLOAD_LEN_16 => {
            if buf.len() < 4 {
                return Ok(Decoded::Incomplete {
                    needed: 4 - buf.len(),
                });
            }
            (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
        }
        PAYLOAD_LEN_64 => {
            if buf.len() < 10 {
                return Ok(Decoded::Incomplete {
                    needed: 10 - buf.len(),
                });
            }
            let mut len = [0u8; 8];
            len.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(len), 10)
        }
        len => (u64::from(len), 2),
    };

    if payload_len >= max_payload {
        return Err(FrameError::TooLarge {
            size: payload_len,
            max: max_payload,
        });
    }
    let payload_len = usize::try_from(payload_len).map_err(|_| FrameError::TooLarge {
        size: payload_len,
        max: max_payload,
    })?;

    let mask = if masked {
        if buf.len() < offset + MASKING_KEY_LEN {
            return Ok(Decoded::Incomplete {
                needed: offset + MASKING_KEY_LEN + payload_len - buf.len(),
            });
        }
        let mut key = [0u8; MASKING_KEY_LEN];
        key.copy_from_slice(&buf[offset..offset + MASKING_KEY_LEN]);
        offset += MASKING_KEY_LEN;
        Some(key)
    } else {
        None
    };

    let frame_len = offset + payload_len;
    if buf.len() < frame_len {
        return Ok(Decoded::Incomplete {
            needed: frame_len - buf.len(),
        });
    }

    let mut payload = BytesMut::from(&buf[offset..frame_len]);
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(Decoded::Complete {
        frame: Frame {
            fin,
            opcode,
            mask,
            payload: payload.freeze(),
        },
        consumed: frame_len,
    })
}

/// Encode a final, unmasked frame as a server sends it
pub fn encode(opcode: Opcode, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(payload.len()));
    write_header(&mut buf, true, opcode, None, payload.len());
    buf.put_slice(payload);
    buf.freeze()
}

/// Size of an unmasked frame carrying `payload_len` bytes
pub fn encoded_len(payload_len: usize) -> usize {
    let header = if payload_len < usize::from(PAYLOAD_LEN_16) {
        2
    } else if payload_len <= usize::from(u16::MAX) {
        4
    } else {
        10
    };
    header + payload_len
}

/// XOR `data` in place with `key[i % 4]`; applying it twice is the identity
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

fn write_header(buf: &mut BytesMut, fin: bool, opcode: Opcode, mask: Option<[u8; 4]>, len: usize) {
    let fin_bit = if fin { FIN_BIT } else { 0 };
    buf.put_u8(fin_bit | opcode.value());

    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    if len < usize::from(PAYLOAD_LEN_16) {
        buf.put_u8(mask_bit | len as u8);
    } else if len <= usize::from(u16::MAX) {
        buf.put_u8(mask_bit | PAYLOAD_LEN_16);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(mask_bit | PAYLOAD_LEN_64);
        buf.put_u64(len as u64);
    }

    if let Some(key) = mask {
        buf.put_slice(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u64 = crate::protocol::constants::DEFAULT_MAX_FRAME_SIZE as u64;

    fn complete(buf: &[u8]) -> (Frame, usize) {
        match decode(buf, MAX).unwrap() {
            Decoded::Complete { frame, consumed } => (frame, consumed),
            other => panic!("expected a complete frame, got {:?}", other),
        }
    }

    #[test]
    fn test_text_frame_encoding() {
        let bytes = encode(Opcode::Text, b"hello");

        assert_eq!(bytes[0], 0x81); // FIN=1, RSV=000, Opcode=0001
        assert_eq!(bytes[1], 0x05); // MASK=0, Length=5
        assert_eq!(&bytes[2..], b"hello");
    }

    #[test]
    fn test_length_forms() {
        let bytes = encode(Opcode::Binary, &[0u8; 125]);
        assert_eq!(bytes[1], 125);
        assert_eq!(bytes.len(), 2 + 125);

        let bytes = encode(Opcode::Binary, &[0u8; 126]);
        assert_eq!(&bytes[1..4], &[126, 0x00, 0x7E]);

        let bytes = encode(Opcode::Binary, &vec![0u8; 65535]);
        assert_eq!(&bytes[1..4], &[126, 0xFF, 0xFF]);
        assert_eq!(bytes.len(), encoded_len(65535));

        let bytes = encode(Opcode::Binary, &vec![0u8; 65536]);
        assert_eq!(bytes[1], 127);
        assert_eq!(&bytes[2..10], &65536u64.to_be_bytes());
        assert_eq!(bytes.len(), encoded_len(65536));
    }

    #[test]
    fn test_decode_masked_rfc_example() {
        // RFC 6455 section 5.7: a single-frame masked text message "Hello"
        let wire = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let (frame, consumed) = complete(&wire);

        assert!(frame.fin);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.mask, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(frame.payload, "Hello");
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn test_decode_unmasked_ping() {
        let wire = [0x89, 0x05, b'H', b'e', b'l', b'l', b'o'];
        let (frame, _) = complete(&wire);

        assert!(frame.is_control());
        assert!(!frame.is_masked());
        assert_eq!(frame.opcode, Opcode::Ping);
        assert_eq!(frame.payload_len(), 5);
    }

    #[test]
    fn test_decode_incomplete() {
        assert_eq!(decode(&[], MAX).unwrap(), Decoded::Incomplete { needed: 2 });
        assert_eq!(decode(&[0x81], MAX).unwrap(), Decoded::Incomplete { needed: 1 });
        assert_eq!(
            decode(&[0x82, 126, 0x01], MAX).unwrap(),
            Decoded::Incomplete { needed: 1 }
        );
        assert_eq!(
            decode(&[0x82, 127, 0, 0], MAX).unwrap(),
            Decoded::Incomplete { needed: 6 }
        );
        assert_eq!(
            decode(&[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f], MAX).unwrap(),
            Decoded::Incomplete { needed: 4 }
        );
    }

    #[test]
    fn test_decode_64bit_length() {
        let payload: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
        let wire = Frame::binary(payload.clone())
            .masked([1, 2, 3, 4])
            .to_bytes();

        assert_eq!(wire[1], MASK_BIT | PAYLOAD_LEN_64);
        let (frame, consumed) = complete(&wire);
        assert_eq!(consumed, wire.len());
        assert_eq!(&frame.payload[..], &payload[..]);
    }

    #[test]
    fn test_decode_rejects_oversized_header() {
        let mut wire = vec![0x82, 127];
        wire.extend_from_slice(&MAX.to_be_bytes());

        assert_eq!(
            decode(&wire, MAX),
            Err(FrameError::TooLarge { size: MAX, max: MAX })
        );

        let mut wire = vec![0x82, 127];
        wire.extend_from_slice(&(MAX - 1).to_be_bytes());
        assert!(matches!(decode(&wire, MAX), Ok(Decoded::Incomplete { .. })));
    }

    #[test]
    fn test_decode_rejects_invalid_headers() {
        assert_eq!(decode(&[0x83, 0x00], MAX), Err(FrameError::InvalidOpcode(0x3)));
        assert_eq!(decode(&[0x8B, 0x00], MAX), Err(FrameError::InvalidOpcode(0xB)));
        assert_eq!(decode(&[0xC1, 0x00], MAX), Err(FrameError::ReservedBitsSet));
        assert_eq!(
            decode(&[0x09, 0x00], MAX),
            Err(FrameError::FragmentedControlFrame)
        );
    }

    #[test]
    fn test_trailing_bytes_are_left() {
        let mut wire = BytesMut::new();
        Frame::text("first").masked([9, 8, 7, 6]).write_to(&mut wire);
        Frame::ping("second").write_to(&mut wire);

        let (first, consumed) = complete(&wire);
        assert_eq!(first.payload, "first");

        let (second, rest) = complete(&wire[consumed..]);
        assert_eq!(second.opcode, Opcode::Ping);
        assert_eq!(second.payload, "second");
        assert_eq!(consumed + rest, wire.len());
    }

    #[test]
    fn test_masking_with_known_key() {
        let key = [0x12, 0x34, 0x56, 0x78];
        let original = b"masking test payload".to_vec();

        let mut data = original.clone();
        apply_mask(&mut data, key);
        assert_eq!(&data[..4], &[b'm' ^ 0x12, b'a' ^ 0x34, b's' ^ 0x56, b'k' ^ 0x78]);
        assert_ne!(data, original);

        apply_mask(&mut data, key);
        assert_eq!(data, original);
    }

    #[test]
    fn test_close_frame() {
        let bytes = Frame::close(Some(1000), "Goodbye").to_bytes();

        assert_eq!(bytes[0], 0x88); // FIN=1, Opcode=8
        assert_eq!(bytes[1], 0x09); // 2 bytes code + 7 bytes reason
        assert_eq!(&bytes[2..4], &1000u16.to_be_bytes());
        assert_eq!(&bytes[4..], b"Goodbye");

        assert_eq!(&Frame::close(None, "ignored").to_bytes()[..], &[0x88, 0x00]);
    }

    #[test]
    fn test_non_final_frame_header() {
        let bytes = Frame::text("ab").fin(false).to_bytes();
        assert_eq!(bytes[0], 0x01);

        let bytes = Frame::continuation("cd").to_bytes();
        assert_eq!(bytes[0], 0x80);
    }
}
