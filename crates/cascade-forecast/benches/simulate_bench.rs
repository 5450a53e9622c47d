//! Criterion benchmarks for cascade simulation and analysis on the
//! metropolitan reference network.

use cascade_forecast::{
    CascadeSimulator, CriticalNodeAnalyzer, DependencyGraph, FailureMode, NodeId,
    SimulationConfig, TopologySpec,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn metro_graph() -> DependencyGraph {
    let spec = TopologySpec::metro_reference().expect("embedded topology");
    DependencyGraph::from_topology(&spec).expect("valid topology")
}

fn bench_simulate(c: &mut Criterion) {
    let graph = metro_graph();
    let snapshot = graph.snapshot();
    let simulator = CascadeSimulator::new(SimulationConfig::default().with_seed(42));
    let start = NodeId::from("power_main_mumbai");

    let mut group = c.benchmark_group("simulate");
    for trials in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(trials), &trials, |b, &trials| {
            b.iter(|| {
                simulator
                    .simulate_snapshot(
                        black_box(&snapshot),
                        &start,
                        FailureMode::PowerOutage,
                        Some(trials),
                    )
                    .expect("simulation")
            });
        });
    }
    group.finish();
}

fn bench_analyze(c: &mut Criterion) {
    let snapshot = metro_graph().snapshot();
    let analyzer = CriticalNodeAnalyzer::new();
    c.bench_function("analyze_metro", |b| {
        b.iter(|| analyzer.analyze(black_box(&snapshot)));
    });
}

criterion_group!(benches, bench_simulate, bench_analyze);
criterion_main!(benches);
