use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tokio_util::codec::{Decoder, Encoder};

use securelink::frame::codec::FrameCodec;
use securelink::frame::payload::{Hello, PlaintextRecord};
use securelink::frame::{Frame, FrameType, LENGTH_PREFIX_SIZE};
use securelink::{EncMode, KxMode, Role};

fn bench_frame_encode_decode(c: &mut Criterion) {
    let payload = Bytes::from(vec![0xABu8; 4096]);

    let mut group = c.benchmark_group("frame_codec");
    group.throughput(Throughput::Bytes(4096));

    group.bench_function("encode_4k", |b| {
        b.iter(|| {
            let frame = Frame::new(FrameType::Data, payload.clone());
            let mut codec = FrameCodec::new();
            let mut buf = BytesMut::with_capacity(4096 + LENGTH_PREFIX_SIZE + 1);
            codec.encode(frame, &mut buf).unwrap();
            black_box(buf);
        })
    });

    group.bench_function("decode_4k", |b| {
        let frame = Frame::new(FrameType::Data, payload.clone());
        let mut codec_enc = FrameCodec::new();
        let mut encoded = BytesMut::new();
        codec_enc.encode(frame, &mut encoded).unwrap();
        let encoded = encoded.freeze();

        b.iter(|| {
            let mut codec = FrameCodec::new();
            let mut buf = BytesMut::from(&encoded[..]);
            let frame = codec.decode(&mut buf).unwrap().unwrap();
            black_box(frame);
        })
    });

    group.bench_function("roundtrip_4k", |b| {
        b.iter(|| {
            let frame = Frame::new(FrameType::Data, payload.clone());
            let mut codec = FrameCodec::new();
            let mut buf = BytesMut::new();
            codec.encode(frame, &mut buf).unwrap();
            let decoded = codec.decode(&mut buf).unwrap().unwrap();
            black_box(decoded);
        })
    });

    group.finish();
}

fn bench_json_payloads(c: &mut Criterion) {
    let mut group = c.benchmark_group("json_payload");

    group.bench_function("hello_frame", |b| {
        let hello = Hello {
            role: Role::Sender,
            enc_mode: EncMode::AesGcm,
            kx_mode: KxMode::Dh,
            demo_mode: false,
        };
        b.iter(|| {
            let frame = Frame::json(FrameType::Hello, black_box(&hello)).unwrap();
            black_box(frame);
        })
    });

    let text = "x".repeat(1024);
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("plaintext_record_1k", |b| {
        let frame = Frame::json(FrameType::Data, &PlaintextRecord { text: text.clone() }).unwrap();
        b.iter(|| {
            let record: PlaintextRecord = serde_json::from_slice(&frame.payload).unwrap();
            black_box(record);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_frame_encode_decode, bench_json_payloads);
criterion_main!(benches);
