//! Criterion benchmarks for the streaming correlator and capture writer.
//!
//! Run with:
//! ```bash
//! cargo bench --package edb-core --bench correlator_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use edb_core::protocol::{Channel, DataSample, TimeSample};
use edb_core::{CaptureWriter, Event, RecordSink, StreamingCorrelator};

fn events(pairs: u32) -> Vec<Event> {
    (0..pairs)
        .flat_map(|i| {
            [
                Event::TimeSample(TimeSample { cycles: i * 300 }),
                Event::DataSample(DataSample {
                    channel: Channel::Vcap,
                    raw: (i % 4096) as u16,
                }),
            ]
        })
        .collect()
}

fn bench_correlate(c: &mut Criterion) {
    let events = events(10_000);

    c.bench_function("correlate_10000_pairs", |b| {
        b.iter(|| {
            let mut corr = StreamingCorrelator::new();
            for event in &events {
                black_box(corr.push(event).unwrap());
            }
            corr.finish()
        })
    });

    c.bench_function("correlate_and_write_10000_pairs", |b| {
        b.iter(|| {
            let mut corr = StreamingCorrelator::new();
            let mut writer = CaptureWriter::new(Vec::with_capacity(80_000));
            for event in &events {
                if let Some(record) = corr.push(event).unwrap() {
                    writer.write_record(&record).unwrap();
                }
            }
            writer.into_inner()
        })
    });
}

criterion_group!(benches, bench_correlate);
criterion_main!(benches);
