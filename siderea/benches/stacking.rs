//! Benchmarks for stacking and drizzle on in-memory frames.
//! Run with: cargo bench -p siderea --bench stacking

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use siderea::{
    Cancellation, Drizzle, DrizzleConfig, DrizzleKernel, Homography, Image32, ImageDimensions,
    SilentObserver, StackConfig, stack_frames,
};
use strum::IntoEnumIterator;

const WIDTH: usize = 1024;
const HEIGHT: usize = 768;
const FRAME_COUNT: usize = 10;

fn noisy_frames(count: usize) -> Vec<Image32> {
    let mut rng = StdRng::seed_from_u64(11);
    let dims = ImageDimensions::new(WIDTH, HEIGHT, 1);
    (0..count)
        .map(|_| {
            let data = (0..dims.sample_count())
                .map(|_| 0.1 + rng.random_range(-0.01f32..0.01))
                .collect();
            Image32::from_planar(dims, data)
        })
        .collect()
}

fn shifted_homographies(count: usize) -> Vec<Homography> {
    (0..count)
        .map(|i| Homography::translation(0.37 * i as f64, -0.21 * i as f64))
        .collect()
}

fn benchmark_stack(c: &mut Criterion) {
    let frames = noisy_frames(FRAME_COUNT);
    let homographies = shifted_homographies(FRAME_COUNT);
    let cancel = Cancellation::new();

    let mut group = c.benchmark_group("stack");
    group.sample_size(10);
    group.throughput(Throughput::Elements((WIDTH * HEIGHT * FRAME_COUNT) as u64));

    let configs = [
        ("average", StackConfig::average()),
        ("median", StackConfig::median()),
        ("sigma_clipped", StackConfig::sigma_clipped(3.0)),
        ("winsorized", StackConfig::winsorized(3.0)),
        ("percentile", StackConfig::percentile(0.2, 0.8)),
    ];
    for (name, config) in configs {
        group.bench_function(BenchmarkId::new("method", name), |b| {
            b.iter(|| {
                black_box(
                    stack_frames(&frames, &homographies, &config, &SilentObserver, &cancel)
                        .expect("stack"),
                )
            })
        });
    }

    group.finish();
}

fn benchmark_drizzle(c: &mut Criterion) {
    let frames = noisy_frames(3);
    let homographies = shifted_homographies(3);

    let mut group = c.benchmark_group("drizzle");
    group.sample_size(10);
    group.throughput(Throughput::Elements((WIDTH * HEIGHT * frames.len()) as u64));

    for kernel in DrizzleKernel::iter() {
        let config = DrizzleConfig::x2().with_kernel(kernel);
        group.bench_function(BenchmarkId::new("kernel", kernel), |b| {
            b.iter(|| {
                let mut drizzle = Drizzle::new(config.clone());
                for (frame, h) in frames.iter().zip(&homographies) {
                    drizzle.add_frame(frame, h, None).expect("add frame");
                }
                black_box(drizzle.finalize())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_stack, benchmark_drizzle);
criterion_main!(benches);
