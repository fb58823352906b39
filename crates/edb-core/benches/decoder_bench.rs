//! Criterion benchmarks for the packet decoder and event classifier.
//!
//! The board streams at 2 Mbaud, so the receive path has to keep up with
//! roughly 25k (TIME, sample) pairs per second.
//!
//! Run with:
//! ```bash
//! cargo bench --package edb-core --bench decoder_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use edb_core::{encode_message, ByteAccumulator, Classifier, Descriptor, PacketDecoder};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn capture_stream(pairs: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    for i in 0..pairs {
        bytes.extend(encode_message(Descriptor::Time, &(i * 300).to_le_bytes()).unwrap());
        bytes.extend(encode_message(Descriptor::Vcap, &((i % 4096) as u16).to_le_bytes()).unwrap());
    }
    bytes
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let stream = capture_stream(1000);
    group.throughput(Throughput::Bytes(stream.len() as u64));

    for chunk in [1usize, 64, 4096] {
        group.bench_with_input(BenchmarkId::new("chunk", chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut acc = ByteAccumulator::new();
                let mut decoder = PacketDecoder::for_host();
                let mut count = 0u32;
                for piece in stream.chunks(chunk) {
                    acc.append(piece);
                    while let Ok(Some(msg)) = decoder.try_decode(&mut acc) {
                        black_box(&msg);
                        count += 1;
                    }
                }
                count
            })
        });
    }
    group.finish();
}

fn bench_decode_and_classify(c: &mut Criterion) {
    let stream = capture_stream(1000);
    let classifier = Classifier::default();

    c.bench_function("decode_and_classify_1000_pairs", |b| {
        b.iter(|| {
            let mut acc = ByteAccumulator::new();
            acc.append(black_box(&stream));
            let mut decoder = PacketDecoder::for_host();
            while let Ok(Some(msg)) = decoder.try_decode(&mut acc) {
                black_box(classifier.classify(msg).unwrap());
            }
        })
    });
}

criterion_group!(benches, bench_decode, bench_decode_and_classify);
criterion_main!(benches);
