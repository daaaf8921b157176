//! Benchmarks for streaming records through the segmented buffer.

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use slipstream::{Access, BufOptions, Participant, StreamBuf};
use std::time::Duration;

// Number of records to stream per iteration.
const BATCH_SIZE: usize = 1024 * 2;

criterion_main!(benches);
criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_secs(3))
        .measurement_time(Duration::from_secs(15));
    targets = write_bench, read_bench
}

/// Options that keep the pruner out of the measurement window.
fn quiet_options() -> BufOptions {
    BufOptions::default().set_prune_interval(Duration::from_secs(3600))
}

fn write_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("StreamBuf");
    group.throughput(Throughput::BytesDecimal((BATCH_SIZE * size_of::<u64>()) as _));

    group.bench_function("write", |b| {
        b.iter_batched(
            || {
                let writer = Participant::named("tx", Access::Write);
                let buf = StreamBuf::<u64>::with_options(quiet_options());
                (buf, writer)
            },
            |(buf, writer)| {
                for record in 0..BATCH_SIZE as u64 {
                    buf.write(record, &writer).unwrap();
                }
                (buf, writer)
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn read_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("StreamBuf");
    group.throughput(Throughput::BytesDecimal((BATCH_SIZE * size_of::<u64>()) as _));

    group.bench_function("read", |b| {
        b.iter_batched(
            || {
                let (reader, writer) = Participant::pair("rx", "tx");
                let buf = StreamBuf::<u64>::with_options(quiet_options());
                for record in 0..BATCH_SIZE as u64 {
                    buf.write(record, &writer).unwrap();
                }
                (buf, reader)
            },
            |(buf, reader)| {
                for _ in 0..BATCH_SIZE {
                    buf.read(&reader).unwrap();
                }
                (buf, reader)
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}
