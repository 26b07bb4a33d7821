use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::SmallRng;

use kindle_core::{Engine, EngineConfig, MemoryGraph, Stimulus, SynthSpec, generate};

fn graph(nodes: usize) -> MemoryGraph {
    let spec = SynthSpec {
        nodes,
        clusters: (nodes / 20).max(1),
        ..SynthSpec::default()
    };
    generate(&spec, &mut SmallRng::seed_from_u64(42))
}

fn full_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.consolidation.enabled = true;
    cfg.resistance.enabled = true;
    cfg.stickiness.enabled = true;
    cfg.criticality.enabled = true;
    cfg.coherence.enabled = true;
    cfg.modes.enabled = true;
    cfg.context.enabled = true;
    cfg
}

fn bench_plain_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_plain");
    for nodes in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(nodes), &nodes, |b, &n| {
            let mut g = graph(n);
            let mut engine = Engine::new(EngineConfig::default()).unwrap();
            b.iter(|| engine.tick(black_box(&mut g), &[], None).unwrap())
        });
    }
    group.finish();
}

fn bench_full_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_full");
    for nodes in [100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(nodes), &nodes, |b, &n| {
            let mut g = graph(n);
            let mut engine = Engine::new(full_config()).unwrap();
            let stimulus = [Stimulus::single("n0", 0.8)];
            b.iter(|| engine.tick(black_box(&mut g), &stimulus, None).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_plain_tick, bench_full_tick);
criterion_main!(benches);
