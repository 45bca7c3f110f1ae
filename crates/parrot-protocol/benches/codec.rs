//! Codec benchmarks for parrot-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use parrot_protocol::{codec, ClientEvent, ServerEvent};

fn bench_decode_message(c: &mut Criterion) {
    let text = codec::encode_client(&ClientEvent::message("user-1", "x".repeat(64))).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("message_64B", |b| b.iter(|| codec::decode(black_box(&text))));
    group.finish();
}

fn bench_encode_message(c: &mut Criterion) {
    let event = ServerEvent::message("user-1", "x".repeat(64), "2025-01-01T00:00:00.000Z");

    let mut group = c.benchmark_group("encode");
    group.bench_function("message_64B", |b| b.iter(|| codec::encode(black_box(&event))));
    group.finish();
}

fn bench_decode_join(c: &mut Criterion) {
    let text = r#"{"event":"join","payload":{"userId":"user-1","username":"Guest#1234","category":"male"}}"#;

    c.bench_function("decode_join", |b| b.iter(|| codec::decode(black_box(text))));
}

criterion_group!(
    benches,
    bench_decode_message,
    bench_encode_message,
    bench_decode_join
);
criterion_main!(benches);
