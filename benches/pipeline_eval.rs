//! Benchmarks for pipeline evaluation
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use witt_pipeline::config::{PipelineConfig, SchedulerConfig};
use witt_pipeline::engine::MemoryEngine;
use witt_pipeline::pipeline::{
    Fingerprinter, NodeId, NodeKind, ParamValue, Params, PipelineGraph, Scheduler,
};

fn params(pairs: &[(&str, ParamValue)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// `table ─► filter ─► aggregate ─► top_k`, with `rows` generated rows.
fn build_graph(rows: i64) -> (PipelineGraph, NodeId, NodeId) {
    let mut graph = PipelineGraph::new(Fingerprinter::default());
    let regions = ["north", "south", "east", "west"];
    let data = (0..rows)
        .map(|i| {
            ParamValue::List(vec![
                ParamValue::from(regions[(i % 4) as usize]),
                ParamValue::from(i % 97),
            ])
        })
        .collect();

    let source = graph
        .add_node(
            NodeKind::SourceTable,
            params(&[
                ("columns", vec!["region", "amount"].into()),
                ("rows", ParamValue::List(data)),
            ]),
        )
        .unwrap();
    let filter = graph
        .add_node(
            NodeKind::Filter,
            params(&[
                ("column", "amount".into()),
                ("op", "gt".into()),
                ("value", 10i64.into()),
            ]),
        )
        .unwrap();
    let aggregate = graph
        .add_node(
            NodeKind::Aggregate,
            params(&[
                ("group_by", vec!["region"].into()),
                ("aggregations", vec!["sum:amount:total", "mean:amount"].into()),
            ]),
        )
        .unwrap();
    let top = graph
        .add_node(
            NodeKind::RowsTopK,
            params(&[("column", "total".into()), ("count", 2i64.into())]),
        )
        .unwrap();

    graph.connect(source, "table", filter, "table").unwrap();
    graph.connect(filter, "table", aggregate, "table").unwrap();
    graph.connect(aggregate, "table", top, "table").unwrap();
    (graph, filter, top)
}

fn config() -> PipelineConfig {
    PipelineConfig {
        scheduler: SchedulerConfig { workers: 2 },
        ..PipelineConfig::default()
    }
}

fn bench_cold_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("cold_evaluation");

    for rows in [1_000i64, 10_000, 100_000].iter() {
        let (graph, _, target) = build_graph(*rows);
        group.throughput(Throughput::Elements(*rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, _| {
            let scheduler = Scheduler::new(&config(), Arc::new(MemoryEngine::new()));
            b.iter(|| {
                scheduler.cache().clear();
                black_box(scheduler.evaluate(&graph, target).unwrap())
            })
        });
    }

    group.finish();
}

fn bench_cached_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_evaluation");

    for rows in [1_000i64, 100_000].iter() {
        let (graph, _, target) = build_graph(*rows);
        let scheduler = Scheduler::new(&config(), Arc::new(MemoryEngine::new()));
        scheduler.evaluate(&graph, target).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, _| {
            b.iter(|| black_box(scheduler.evaluate(&graph, target).unwrap()))
        });
    }

    group.finish();
}

fn bench_fingerprint_refresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint_refresh");
    let (mut graph, filter, _) = build_graph(1_000);
    let mut threshold = 0i64;

    group.bench_function("set_parameters", |b| {
        b.iter(|| {
            threshold = (threshold + 1) % 50;
            black_box(
                graph
                    .set_parameters(filter, params(&[("value", threshold.into())]))
                    .unwrap(),
            )
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_cold_evaluation,
    bench_cached_evaluation,
    bench_fingerprint_refresh
);
criterion_main!(benches);
