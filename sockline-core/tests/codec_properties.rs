//! Property tests for the frame codec and fragment assembly

use proptest::prelude::*;
use sockline_core::frame::{decode, encode};
use sockline_core::protocol::constants::DEFAULT_MAX_FRAME_SIZE;
use sockline_core::{Assembled, Decoded, Frame, Message, MessageAssembler, Opcode};

const MAX: u64 = DEFAULT_MAX_FRAME_SIZE as u64;

fn arb_opcode() -> impl Strategy<Value = Opcode> {
    prop_oneof![
        Just(Opcode::Text),
        Just(Opcode::Binary),
        Just(Opcode::Close),
        Just(Opcode::Ping),
        Just(Opcode::Pong),
    ]
}

fn decode_one(wire: &[u8]) -> (Frame, usize) {
    match decode(wire, MAX) {
        Ok(Decoded::Complete { frame, consumed }) => (frame, consumed),
        other => panic!("expected a complete frame, got {:?}", other),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// decode(encode(op, p)) yields the same opcode and payload.
    #[test]
    fn encode_decode_roundtrip(op in arb_opcode(), payload in prop::collection::vec(any::<u8>(), 0..2048)) {
        let wire = encode(op, &payload);
        let (frame, consumed) = decode_one(&wire);

        prop_assert!(frame.fin);
        prop_assert!(!frame.is_masked());
        prop_assert_eq!(frame.opcode, op);
        prop_assert_eq!(&frame.payload[..], &payload[..]);
        prop_assert_eq!(consumed, wire.len());
    }

    /// A masked client frame decodes to its plaintext payload.
    #[test]
    fn masked_frames_unmask(key in any::<[u8; 4]>(), payload in prop::collection::vec(any::<u8>(), 0..512)) {
        let wire = Frame::binary(payload.clone()).masked(key).to_bytes();
        let (frame, _) = decode_one(&wire);

        prop_assert_eq!(frame.mask, Some(key));
        prop_assert_eq!(&frame.payload[..], &payload[..]);
    }

    /// Every strict prefix of a frame is reported as incomplete.
    #[test]
    fn prefixes_are_incomplete(payload in prop::collection::vec(any::<u8>(), 0..300), cut in any::<prop::sample::Index>()) {
        let wire = encode(Opcode::Binary, &payload);
        let cut = cut.index(wire.len());

        let is_incomplete = matches!(decode(&wire[..cut], MAX), Ok(Decoded::Incomplete { .. }));
        prop_assert!(is_incomplete);
    }

    /// Splitting a message into fragments never changes what is delivered.
    #[test]
    fn fragments_reassemble(payload in prop::collection::vec(any::<u8>(), 1..1024), pieces in 1usize..8) {
        let mut assembler = MessageAssembler::default();
        let chunk = (payload.len() + pieces - 1) / pieces;
        let chunks: Vec<&[u8]> = payload.chunks(chunk).collect();

        let mut delivered = None;
        for (i, part) in chunks.iter().enumerate() {
            let opcode = if i == 0 { Opcode::Binary } else { Opcode::Continuation };
            let fin = i + 1 == chunks.len();
            let frame = Frame::new(opcode, part.to_vec()).fin(fin);

            match assembler.push(frame).unwrap() {
                Assembled::Message(message) => delivered = Some(message),
                Assembled::Pending => prop_assert!(!fin),
                Assembled::Dropped { .. } => prop_assert!(false, "message should fit"),
            }
        }

        prop_assert_eq!(delivered, Some(Message::binary(payload)));
    }
}

#[test]
fn roundtrip_at_length_boundaries() {
    for len in [0usize, 1, 124, 125, 126, 65535, 65536, DEFAULT_MAX_FRAME_SIZE - 1] {
        let payload: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
        let wire = encode(Opcode::Binary, &payload);
        let (frame, consumed) = decode_one(&wire);

        assert_eq!(frame.payload.len(), len, "length {}", len);
        assert_eq!(&frame.payload[..], &payload[..]);
        assert_eq!(consumed, wire.len());
    }
}

#[test]
fn frame_at_limit_is_rejected() {
    let payload = vec![0u8; DEFAULT_MAX_FRAME_SIZE];
    let wire = encode(Opcode::Binary, &payload);

    assert!(decode(&wire, MAX).is_err());
}
