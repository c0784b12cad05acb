//! Codec benchmarks for courier-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use courier_protocol::{codec, Frame, WireFormat, WireMessage};

fn bench_encode_small(c: &mut Criterion) {
    let frame = Frame::new("bob", "alice", vec![0u8; 64]);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("json_64B", |b| {
        b.iter(|| codec::encode(black_box(&frame), WireFormat::Json))
    });
    group.bench_function("msgpack_64B", |b| {
        b.iter(|| codec::encode(black_box(&frame), WireFormat::MessagePack))
    });
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let frame = Frame::new("bob", "alice", vec![b'a'; 64]);
    let json = WireMessage::Text(
        format!(
            r#"{{"recipient":"bob","sender":"alice","content":"{}"}}"#,
            "a".repeat(64)
        ),
    );
    let msgpack = codec::encode(&frame, WireFormat::MessagePack).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(msgpack.len() as u64));
    group.bench_function("json_64B", |b| b.iter(|| codec::decode(black_box(&json))));
    group.bench_function("msgpack_64B", |b| {
        b.iter(|| codec::decode(black_box(&msgpack)))
    });
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let frame = Frame::new("bob", "alice", vec![0u8; 256]);

    c.bench_function("roundtrip_msgpack_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame), WireFormat::MessagePack).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_small,
    bench_roundtrip
);
criterion_main!(benches);
