//! Frame parser benchmarks.
//!
//! Run with: cargo bench -p ouchgate-proto

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ouchgate_proto::envelope;
use ouchgate_proto::{side, EnterOrder, FrameMode, FrameParser, OrderToken};

const BATCH: usize = 128;

fn raw_batch() -> Vec<u8> {
    let order = EnterOrder::new(OrderToken::new("BENCH"), 1, side::BUY, 100, 2500);
    bytemuck::bytes_of(&order).repeat(BATCH)
}

fn bench_raw(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parser");
    group.throughput(Throughput::Elements(BATCH as u64));

    let stream = raw_batch();
    group.bench_function("raw_128", |b| {
        b.iter(|| {
            let mut frames = FrameParser::frames(black_box(&stream), FrameMode::Raw);
            let count = frames.by_ref().filter(Result::is_ok).count();
            black_box((count, frames.consumed()))
        })
    });

    group.finish();
}

fn bench_enveloped(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parser");
    group.throughput(Throughput::Elements(BATCH as u64));

    let order = EnterOrder::new(OrderToken::new("BENCH"), 1, side::BUY, 100, 2500);
    let mut stream = vec![0u8; BATCH * envelope::MAX_ENVELOPE_SIZE];
    let mut len = 0;
    for id in 0..BATCH as u64 {
        len += envelope::wrap(id, bytemuck::bytes_of(&order), &mut stream[len..]).unwrap();
    }
    stream.truncate(len);

    group.bench_function("enveloped_128", |b| {
        b.iter(|| {
            let frames = FrameParser::frames(black_box(&stream), FrameMode::Enveloped);
            let ids: u64 = frames
                .filter_map(Result::ok)
                .filter_map(|f| f.routing_id(&stream).ok())
                .sum();
            black_box(ids)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_raw, bench_enveloped);
criterion_main!(benches);
