//! Resample Performance Benchmark
//!
//! Measures converter throughput for every algorithm on the chunk sizes the
//! fill callback uses.
//!
//! ## Test Scenarios
//!
//! - 44100 Hz → 48000 Hz (ratio: 1.0884)
//! - 48000 Hz → 44100 Hz (ratio: 0.91875)
//! - 96000 Hz → 44100 Hz (ratio: 0.459375)

use clipdeck_ap::audio::resampler::scratch_frames;
use clipdeck_ap::audio::{ResamplerKind, SampleRateConverter};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Seconds of stereo audio converted per iteration
const DURATION_S: u32 = 5;

fn bench_resample(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample_performance");
    group.sample_size(10);

    for (source_rate, target_rate) in [(44_100u32, 48_000u32), (48_000, 44_100), (96_000, 44_100)] {
        let ratio = target_rate as f64 / source_rate as f64;
        let chunk = scratch_frames(source_rate, ratio);
        let total_frames = (source_rate * DURATION_S) as usize;
        let input: Vec<f32> = vec![0.5; total_frames * 2];
        group.throughput(Throughput::Elements(total_frames as u64));

        for kind in ResamplerKind::ALL {
            let id = format!("{}_to_{}/{}", source_rate, target_rate, kind.name());
            group.bench_function(BenchmarkId::from_parameter(id), |b| {
                let mut converter =
                    SampleRateConverter::new(kind, 2, chunk, ratio).expect("converter");
                b.iter(|| {
                    converter.reset();
                    let mut produced = 0;
                    for block in input.chunks(chunk * 2) {
                        let out = converter
                            .process(black_box(block), ratio, false)
                            .expect("process");
                        produced += out.len();
                    }
                    black_box(produced);
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_resample);
criterion_main!(benches);
