//! Microbenchmarks for the unit exchange hot paths.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use osmosis::prelude::*;
use std::hint::black_box;
use std::sync::Arc;

/// Payload mutation on an unattached unit (no transport involved).
fn bench_payload_mutation(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_mutation");

    group.bench_function("set", |b| {
        let unit = Unit::new("bench");
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            unit.set("key", i.to_string()).unwrap();
        });
    });

    for size in [4usize, 32, 256] {
        group.bench_with_input(BenchmarkId::new("replace", size), &size, |b, &size| {
            let unit = Unit::new("bench");
            let entries: Vec<(String, String)> = (0..size)
                .map(|i| (format!("key{i}"), format!("value{i}")))
                .collect();
            b.iter(|| {
                unit.replace(entries.clone()).unwrap();
            });
        });
    }

    group.finish();
}

/// Wire encode/decode of a payload update.
fn bench_wire_codec(c: &mut Criterion) {
    use osmosis::payload::PayloadDelta;
    use osmosis::wire::{PayloadChange, PayloadUpdate, WireMessage};

    let message = WireMessage::PayloadUpdate(PayloadUpdate {
        uid: Uid::from("bench-unit"),
        revision: 42,
        origin: "producer/0123abcd/OB".into(),
        writer: "producer/0123abcd/OB".into(),
        change: PayloadChange::Delta(vec![PayloadDelta::set(
            "utterance",
            Some("previous hypothesis".into()),
            "current hypothesis",
        )]),
    });
    let bytes = message.encode().unwrap();

    let mut group = c.benchmark_group("wire_codec");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("encode", |b| {
        b.iter(|| black_box(message.encode().unwrap()));
    });
    group.bench_function("decode", |b| {
        b.iter(|| black_box(WireMessage::decode(&bytes).unwrap()));
    });
    group.finish();
}

/// Publish path: a set on an owned, published unit, including the wire
/// hand-off to the local bus.
fn bench_publish_path(c: &mut Criterion) {
    let bus = Arc::new(LocalBus::new());
    let context = Context::new(bus);
    let output = OutputBuffer::new("bench", context).unwrap();
    let unit = Unit::new("bench");
    output.add(&unit).unwrap();

    let mut i = 0u64;
    c.bench_function("publish_set", |b| {
        b.iter(|| {
            i += 1;
            unit.set("key", i.to_string()).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_payload_mutation,
    bench_wire_codec,
    bench_publish_path
);
criterion_main!(benches);
