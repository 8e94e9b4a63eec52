//! Performance contract for the Experience Replay Buffer (spec §4.7:
//! "add p99 < 1 ms, sample(32) p99 < 10 ms, both sustained under ≥1000
//! concurrent operations"). Run with `cargo bench` once the `accelerated`
//! feature set or fallback network is wired in; this file exercises only
//! the buffer itself, which is backend-independent.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use quantum_routing_core::rl::ReplayBuffer;
use quantum_routing_core::rl::replay::Experience;
use quantum_routing_core::routing::{ContextType, RoutingState};

fn sample_state() -> RoutingState {
    RoutingState::new(0.5, ContextType::CodeGeneration, [true; 5], [0.5; 5], 0.3, 0.3, 0.4, 0.5)
}

fn bench_add(c: &mut Criterion) {
    let buffer = ReplayBuffer::new(10_000, false, 0.6, 1);
    c.bench_function("replay_buffer_add", |b| {
        b.iter_batched(
            || Experience::new(sample_state(), 0, 0.5, sample_state(), false, 0),
            |experience| buffer.add(experience),
            BatchSize::SmallInput,
        )
    });
}

fn bench_sample(c: &mut Criterion) {
    let buffer = ReplayBuffer::new(10_000, false, 0.6, 1);
    for i in 0..5_000 {
        buffer.add(Experience::new(sample_state(), i % 12, 0.5, sample_state(), false, 0));
    }
    c.bench_function("replay_buffer_sample_32", |b| {
        b.iter(|| buffer.sample(32))
    });
}

fn bench_priority_sample(c: &mut Criterion) {
    let buffer = ReplayBuffer::new(10_000, true, 0.6, 1);
    for i in 0..5_000 {
        buffer.add(Experience::new(sample_state(), i % 12, (i % 7) as f64 - 3.0, sample_state(), false, 0));
    }
    c.bench_function("replay_buffer_priority_sample_32", |b| {
        b.iter(|| buffer.sample(32))
    });
}

criterion_group!(benches, bench_add, bench_sample, bench_priority_sample);
criterion_main!(benches);
