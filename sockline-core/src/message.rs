//! Application messages and fragment reassembly
//!
//! A [`Message`] is what handlers see: a complete text or binary payload,
//! however many frames it arrived in. [`MessageAssembler`] turns the data frames
//! of one connection into messages. Control frames never pass through it.

use crate::error::{Error, ProtocolError, Result};
use crate::frame::Frame;
use crate::protocol::{constants::DEFAULT_MAX_MESSAGE_SIZE, Opcode};
use bytes::{Bytes, BytesMut};
use std::fmt;

/// A complete WebSocket data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text message
    Text(String),
    /// Binary message
    Binary(Bytes),
}

impl Message {
    /// Create a text message
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a binary message
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Build a message from a reassembled payload, validating text as UTF-8
    pub fn from_payload(opcode: Opcode, payload: Bytes) -> Result<Self> {
        match opcode {
            Opcode::Text => String::from_utf8(payload.to_vec())
                .map(Message::Text)
                .map_err(|_| Error::Protocol(ProtocolError::InvalidUtf8)),
            _ => Ok(Message::Binary(payload)),
        }
    }

    /// Opcode this message is sent with
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Text(_) => Opcode::Text,
            Message::Binary(_) => Opcode::Binary,
        }
    }

    /// Get the message payload as text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            Message::Binary(_) => None,
        }
    }

    /// Get the raw payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Single unmasked frame carrying this message
    pub fn to_frame(&self) -> Frame {
        Frame::new(self.opcode(), Bytes::copy_from_slice(self.as_bytes()))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Text(text) => write!(f, "Text({})", text),
            Message::Binary(data) => write!(f, "Binary({} bytes)", data.len()),
        }
    }
}

/// Result of pushing a frame into a [`MessageAssembler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    /// A message is complete
    Message(Message),
    /// The frame was buffered (or swallowed) and nothing is ready yet
    Pending,
    /// The fragmented message outgrew the limit and was thrown away
    Dropped {
        /// Buffered size that triggered the drop
        size: usize,
    },
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Collecting {
        opcode: Opcode,
        buffer: BytesMut,
    },
    /// Swallowing the remainder of a dropped message until its final frame
    Discarding,
}

/// Reassembles fragmented data frames into messages
///
/// Unfragmented data frames are delivered immediately, even while a
/// fragmented message is open, and leave that message untouched. A new
/// non-final data frame replaces whatever fragment was being collected.
#[derive(Debug)]
pub struct MessageAssembler {
    state: State,
    max_message_size: usize,
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl MessageAssembler {
    /// Create an assembler that drops fragmented messages above `max_message_size`
    pub fn new(max_message_size: usize) -> Self {
        Self {
            state: State::Idle,
            max_message_size,
        }
    }

    /// Feed one data frame
    pub fn push(&mut self, frame: Frame) -> Result<Assembled> {
        let max = self.max_message_size;
        match (frame.fin, frame.opcode) {
            (true, Opcode::Continuation) => match std::mem::take(&mut self.state) {
                State::Idle => Err(ProtocolError::UnexpectedContinuation.into()),
                State::Discarding => Ok(Assembled::Pending),
                State::Collecting { opcode, mut buffer } => {
                    if let Some(size) = overflows(&buffer, &frame, max) {
                        return Ok(Assembled::Dropped { size });
                    }
                    buffer.extend_from_slice(&frame.payload);
                    Message::from_payload(opcode, buffer.freeze()).map(Assembled::Message)
                }
            },
            (false, Opcode::Continuation) => match &mut self.state {
                State::Idle => Err(ProtocolError::UnexpectedContinuation.into()),
                State::Discarding => Ok(Assembled::Pending),
                State::Collecting { buffer, .. } => {
                    if let Some(size) = overflows(buffer, &frame, max) {
                        self.state = State::Discarding;
                        return Ok(Assembled::Dropped { size });
                    }
                    buffer.extend_from_slice(&frame.payload);
                    Ok(Assembled::Pending)
                }
            },
            (true, opcode) => Message::from_payload(opcode, frame.payload).map(Assembled::Message),
            (false, opcode) => {
                if frame.payload.len() > max {
                    self.state = State::Discarding;
                    return Ok(Assembled::Dropped {
                        size: frame.payload.len(),
                    });
                }
                self.state = State::Collecting {
                    opcode,
                    buffer: BytesMut::from(&frame.payload[..]),
                };
                Ok(Assembled::Pending)
            }
        }
    }

    /// Forget any partially assembled message
    pub fn clear(&mut self) {
        self.state = State::Idle;
    }

    /// Check if a fragmented message is open (collecting or discarding)
    pub fn is_assembling(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// Bytes currently held for the open fragmented message
    pub fn buffered_bytes(&self) -> usize {
        match &self.state {
            State::Collecting { buffer, .. } => buffer.len(),
            _ => 0,
        }
    }
}

fn overflows(buffer: &BytesMut, frame: &Frame, max: usize) -> Option<usize> {
    let size = buffer.len() + frame.payload.len();
    (size > max).then_some(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_accessors() {
        let text = Message::text("hello");
        assert_eq!(text.opcode(), Opcode::Text);
        assert_eq!(text.as_text(), Some("hello"));
        assert_eq!(text.len(), 5);

        let binary = Message::binary(vec![1, 2, 3]);
        assert_eq!(binary.as_text(), None);
        assert_eq!(binary.as_bytes(), &[1, 2, 3]);
        assert_eq!(binary.to_frame().opcode, Opcode::Binary);
    }

    #[test]
    fn test_message_display() {
        assert_eq!(Message::text("hello").to_string(), "Text(hello)");
        assert_eq!(Message::binary(vec![1, 2, 3]).to_string(), "Binary(3 bytes)");
    }

    #[test]
    fn test_unfragmented_delivery() {
        let mut assembler = MessageAssembler::default();

        let out = assembler.push(Frame::binary(vec![7u8; 4])).unwrap();
        assert_eq!(out, Assembled::Message(Message::binary(vec![7u8; 4])));
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_fragmented_reassembly() {
        let mut assembler = MessageAssembler::default();

        let first = Frame::text("ab").fin(false);
        let middle = Frame::continuation("cd").fin(false);
        let last = Frame::continuation("ef");

        assert_eq!(assembler.push(first).unwrap(), Assembled::Pending);
        assert!(assembler.is_assembling());
        assert_eq!(assembler.push(middle).unwrap(), Assembled::Pending);
        assert_eq!(assembler.buffered_bytes(), 4);

        let out = assembler.push(last).unwrap();
        assert_eq!(out, Assembled::Message(Message::text("abcdef")));
        assert!(!assembler.is_assembling());
        assert_eq!(assembler.buffered_bytes(), 0);
    }

    #[test]
    fn test_unfragmented_frame_inside_fragment() {
        let mut assembler = MessageAssembler::default();

        assembler.push(Frame::binary(vec![1]).fin(false)).unwrap();
        let out = assembler.push(Frame::text("now")).unwrap();
        assert_eq!(out, Assembled::Message(Message::text("now")));

        let out = assembler.push(Frame::continuation(vec![2])).unwrap();
        assert_eq!(out, Assembled::Message(Message::binary(vec![1, 2])));
    }

    #[test]
    fn test_unexpected_continuation() {
        let mut assembler = MessageAssembler::default();

        for frame in [Frame::continuation("x"), Frame::continuation("x").fin(false)] {
            let err = assembler.push(frame).unwrap_err();
            assert!(matches!(
                err,
                Error::Protocol(ProtocolError::UnexpectedContinuation)
            ));
        }
    }

    #[test]
    fn test_overflow_drops_and_recovers() {
        let mut assembler = MessageAssembler::new(8);

        assembler.push(Frame::binary(vec![0u8; 6]).fin(false)).unwrap();
        let out = assembler
            .push(Frame::continuation(vec![0u8; 6]).fin(false))
            .unwrap();
        assert_eq!(out, Assembled::Dropped { size: 12 });
        assert_eq!(assembler.buffered_bytes(), 0);

        // The rest of the dropped message is swallowed, including its FIN
        assert_eq!(
            assembler.push(Frame::continuation(vec![0u8; 2]).fin(false)).unwrap(),
            Assembled::Pending
        );
        assert_eq!(
            assembler.push(Frame::continuation(vec![0u8; 2])).unwrap(),
            Assembled::Pending
        );
        assert!(!assembler.is_assembling());

        assembler.push(Frame::text("ok").fin(false)).unwrap();
        let out = assembler.push(Frame::continuation("!")).unwrap();
        assert_eq!(out, Assembled::Message(Message::text("ok!")));
    }

    #[test]
    fn test_overflow_on_final_fragment() {
        let mut assembler = MessageAssembler::new(4);

        assembler.push(Frame::text("abc").fin(false)).unwrap();
        let out = assembler.push(Frame::continuation("de")).unwrap();
        assert_eq!(out, Assembled::Dropped { size: 5 });
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_invalid_utf8_text() {
        let mut assembler = MessageAssembler::default();

        let err = assembler
            .push(Frame::text(vec![0xff, 0xfe]))
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::InvalidUtf8)));

        // Split code point across fragments is fine once reassembled
        let snowman = "\u{2603}".as_bytes();
        assembler
            .push(Frame::text(snowman[..1].to_vec()).fin(false))
            .unwrap();
        let out = assembler
            .push(Frame::continuation(snowman[1..].to_vec()))
            .unwrap();
        assert_eq!(out, Assembled::Message(Message::text("\u{2603}")));
    }

    #[test]
    fn test_clear() {
        let mut assembler = MessageAssembler::default();
        assembler.push(Frame::text("ab").fin(false)).unwrap();

        assembler.clear();
        assert!(!assembler.is_assembling());
        assert!(assembler.push(Frame::continuation("cd")).is_err());
    }
}
