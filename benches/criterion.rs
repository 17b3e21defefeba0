use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array4;

use kinet::model::{cnn_lstm, Network};

fn forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward");
    for batch in [8, 32, 128] {
        let mut network = Network::build(&cnn_lstm(5), &[6, 5, 10]).unwrap();
        let input = Array4::from_elem((batch, 6, 5, 10), 0.1f32).into_dyn();
        group.bench_with_input(BenchmarkId::new("cnn_lstm", batch), &batch, |b, _| {
            b.iter(|| black_box(network.forward(&input, false).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(bench_forward, forward);
criterion_main!(bench_forward);
