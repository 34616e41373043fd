//! Criterion benchmarks for the data path hot spots.
//!
//! - **Limits** - copy-limit computation between two streams
//! - **Ring** - wrapped copy from one ring into another at varying period sizes
//!
//! Run with: `cargo bench -p canal-core`
#![allow(missing_docs)]

use canal_core::{AudioStream, BufferId, CompBuffer, CopyLimits, StreamParams};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

const PERIOD_FRAMES: &[usize] = &[48, 192, 480, 960];

fn bench_limits(c: &mut Criterion) {
    let mut group = c.benchmark_group("limits");
    let mut src = AudioStream::new(8192);
    let mut sink = AudioStream::new(8192);
    src.produce(5000);
    sink.produce(3000);

    group.bench_function("between", |b| {
        b.iter(|| black_box(CopyLimits::between(black_box(&src), black_box(&sink))));
    });
    group.bench_function("frame_aligned", |b| {
        b.iter(|| black_box(CopyLimits::frame_aligned(black_box(&src), black_box(&sink))));
    });

    let a = CompBuffer::new(BufferId(1), 8192);
    let z = CompBuffer::new(BufferId(2), 8192);
    a.acquire().stream.produce(5000);
    group.bench_function("locked", |b| {
        b.iter(|| black_box(CopyLimits::locked(black_box(&a), black_box(&z))));
    });
    group.finish();
}

fn bench_ring(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring");
    let params = StreamParams::default();
    for &frames in PERIOD_FRAMES {
        let bytes = params.bytes_for(frames);
        // odd capacity so every few periods straddle the wrap
        let mut src = AudioStream::with_params(bytes * 3 + 4, params);
        let mut sink = AudioStream::with_params(bytes * 3 + 4, params);
        let period = vec![0x5au8; bytes];
        group.bench_with_input(BenchmarkId::new("period", frames), &frames, |b, _| {
            b.iter(|| {
                src.fill(0, &period);
                src.produce(bytes);
                let limits = CopyLimits::between(&src, &sink);
                src.copy_into(&mut sink, limits.source_bytes);
                src.consume(limits.source_bytes);
                sink.produce(limits.sink_bytes);
                sink.consume(limits.sink_bytes);
                black_box(limits.frames)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_limits, bench_ring);
criterion_main!(benches);
