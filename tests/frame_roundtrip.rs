use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

use securelink::error::FrameError;
use securelink::frame::codec::FrameCodec;
use securelink::frame::payload::{GcmRecord, PlaintextRecord};
use securelink::frame::{Frame, FrameType, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};

// Strategy for generating arbitrary frame types.
fn arb_frame_type() -> impl Strategy<Value = FrameType> {
    prop_oneof![
        Just(FrameType::Hello),
        Just(FrameType::Negotiate),
        Just(FrameType::KeyExchange),
        Just(FrameType::Data),
        Just(FrameType::Ack),
        Just(FrameType::Error),
        Just(FrameType::Close),
    ]
}

// Payloads are kept small for speed; the size limit has its own tests.
fn arb_payload() -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..2048).prop_map(Bytes::from)
}

fn arb_frame() -> impl Strategy<Value = Frame> {
    (arb_frame_type(), arb_payload()).prop_map(|(frame_type, payload)| Frame::new(frame_type, payload))
}

proptest! {
    #[test]
    fn frame_roundtrip(frame in arb_frame()) {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        codec.encode(frame.clone(), &mut buf).unwrap();
        prop_assert_eq!(buf.len(), LENGTH_PREFIX_SIZE + frame.wire_len());

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        prop_assert_eq!(decoded, frame);
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn frame_roundtrip_chunked(frame in arb_frame(), split_point in 0usize..4096) {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let split = split_point.min(buf.len());
        let rest = buf.split_off(split);
        let mut partial = buf;

        // First decode attempt may return None (not enough data).
        if let Some(decoded) = codec.decode(&mut partial).unwrap() {
            prop_assert_eq!(decoded, frame);
            return Ok(());
        }

        partial.extend_from_slice(&rest);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn declared_length_over_limit_rejected(extra in 1u32..1_000_000) {
        let declared = MAX_FRAME_SIZE as u32 + extra;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&declared.to_be_bytes());

        let err = FrameCodec::new().decode(&mut buf).unwrap_err();
        let is_oversized = matches!(err, FrameError::OversizedFrame { .. });
        prop_assert!(is_oversized);
    }

    #[test]
    fn unknown_type_bytes_rejected(type_byte in 8u8..=255) {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 0, 1, type_byte]);
        let err = FrameCodec::new().decode(&mut buf).unwrap_err();
        let is_unknown = matches!(err, FrameError::UnknownFrameType(b) if b == type_byte);
        prop_assert!(is_unknown);
    }

    #[test]
    fn plaintext_record_carries_any_text(text in ".{0,200}") {
        let record = PlaintextRecord { text: text.clone() };
        let frame = Frame::json(FrameType::Data, &record).unwrap();
        let back: PlaintextRecord = serde_json::from_slice(&frame.payload).unwrap();
        prop_assert_eq!(back.text, text);
    }

    #[test]
    fn gcm_record_binary_fields_survive_json(
        seq in any::<u64>(),
        ciphertext in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let record = GcmRecord {
            seq,
            nonce: vec![7; 12],
            ciphertext,
            tag: vec![9; 16],
        };
        let json = serde_json::to_vec(&record).unwrap();
        let back: GcmRecord = serde_json::from_slice(&json).unwrap();
        prop_assert_eq!(back, record);
    }
}
