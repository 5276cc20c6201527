use bytes::BytesMut;
use duplex_wire::{
    Role,
    codec::{Codec, encode},
    frame::{Frame, OpCode},
};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

const MAX: usize = 1 << 20;

fn data_opcode() -> impl Strategy<Value = OpCode> {
    prop_oneof![Just(OpCode::Text), Just(OpCode::Binary)]
}

proptest! {
    #[test]
    fn masked_client_frames_decode_to_original(
        opcode in data_opcode(),
        payload in proptest::collection::vec(any::<u8>(), 0..70_000),
    ) {
        let mut wire = BytesMut::new();
        encode(opcode, payload.clone(), true, &mut wire).unwrap();
        prop_assert_eq!(wire[1] & 0x80, 0x80);

        let mut server = Codec::new(Role::Server, MAX);
        let frame = server.decode(&mut wire).unwrap().unwrap();
        prop_assert_eq!(frame.opcode(), opcode);
        prop_assert!(frame.is_fin());
        prop_assert!(frame.mask().is_some());
        prop_assert_eq!(frame.payload().as_ref(), payload.as_slice());
        prop_assert!(wire.is_empty());
    }

    #[test]
    fn control_frames_survive_chunked_delivery(
        payload in proptest::collection::vec(any::<u8>(), 0..=125),
        chunk in 1usize..9,
    ) {
        let mut wire = BytesMut::new();
        Codec::new(Role::Client, MAX).encode(Frame::ping(payload.clone()), &mut wire).unwrap();

        let mut server = Codec::new(Role::Server, MAX);
        let mut src = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            src.extend_from_slice(piece);
            while let Some(frame) = server.decode(&mut src).unwrap() {
                decoded.push(frame);
            }
        }

        prop_assert_eq!(decoded.len(), 1);
        prop_assert_eq!(decoded[0].opcode(), OpCode::Ping);
        prop_assert_eq!(decoded[0].payload().as_ref(), payload.as_slice());
    }
}
