//! Codec benchmarks for conduit-protocol.

use conduit_protocol::{codec, Message, Payload};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::Value;

fn message_with_body(len: usize) -> Message {
    let mut payload = Payload::new();
    payload.insert("body".into(), Value::String("x".repeat(len)));
    Message::new("rooms", "lobby", "new:msg", payload)
}

fn bench_encode_small(c: &mut Criterion) {
    let message = message_with_body(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("small_64B", |b| b.iter(|| codec::encode(black_box(&message))));
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let encoded = codec::encode(&message_with_body(64));

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("small_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let message = message_with_body(256);

    c.bench_function("roundtrip_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&message));
            codec::decode(black_box(&encoded)).unwrap()
        })
    });
}

fn bench_heartbeat(c: &mut Criterion) {
    let encoded = codec::encode(&Message::heartbeat());

    c.bench_function("heartbeat_decode", |b| {
        b.iter(|| codec::decode(black_box(&encoded)).unwrap().is_heartbeat())
    });
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_small,
    bench_roundtrip,
    bench_heartbeat
);
criterion_main!(benches);
