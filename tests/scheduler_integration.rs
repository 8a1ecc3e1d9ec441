//! Integration tests for the scheduler and result cache
//!
//! These tests validate evaluation behaviour across runs and threads:
//! - Re-running an unchanged graph executes nothing
//! - Identical nodes share one cached result
//! - Concurrent evaluations execute each node once
//! - Cancellation leaves no partial results behind
//! - Engine failures and the failure retry policy

mod common;

use common::builders::{config, numbers, params, text_list};
use common::mock_helpers::{CountingEngine, MockEngine};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use witt_pipeline::config::PipelineConfig;
use witt_pipeline::engine::EngineError;
use witt_pipeline::frame::Frame;
use witt_pipeline::pipeline::{
    EvaluateOptions, EvaluationId, ExecutionError, Fingerprinter, NodeKind, NodeOutcome,
    ParamValue, PipelineController, PipelineGraph, Position, Scheduler,
};

/// `table(n = 1..=rows) ─► filter(n > 2) ─► viewer`
fn chain(rows: i64) -> (PipelineGraph, [witt_pipeline::NodeId; 3]) {
    let mut graph = PipelineGraph::new(Fingerprinter::default());
    let source = graph
        .add_node(
            NodeKind::SourceTable,
            params(&[
                ("columns", text_list(&["n"])),
                (
                    "rows",
                    ParamValue::List((1..=rows).map(|i| ParamValue::List(vec![i.into()])).collect()),
                ),
            ]),
        )
        .unwrap();
    let filter = graph
        .add_node(
            NodeKind::Filter,
            params(&[
                ("column", "n".into()),
                ("op", "gt".into()),
                ("value", 2i64.into()),
            ]),
        )
        .unwrap();
    let viewer = graph.add_node(NodeKind::SinkViewer, params(&[])).unwrap();
    graph.connect(source, "table", filter, "table").unwrap();
    graph.connect(filter, "table", viewer, "table").unwrap();
    (graph, [source, filter, viewer])
}

#[test]
fn test_rerun_executes_nothing() {
    let engine = CountingEngine::new();
    let mut controller = PipelineController::with_engine(config(2), engine.clone());
    let source = numbers(&mut controller, 8);
    let viewer = controller.add_node(NodeKind::SinkViewer, params(&[])).unwrap();
    controller.connect(source, "table", viewer, "table").unwrap();

    controller.run(viewer).unwrap();
    assert_eq!(engine.calls(), 2);

    let again = controller.run(viewer).unwrap();
    assert!(again.executed.is_empty());
    assert_eq!(again.cache_hits, 2);
    assert_eq!(engine.calls(), 2);
    assert_eq!(again.target_result().unwrap().rows(), 8);
}

#[test]
fn test_moving_a_node_keeps_results() {
    let engine = CountingEngine::new();
    let mut controller = PipelineController::with_engine(config(2), engine.clone());
    let source = numbers(&mut controller, 8);
    let viewer = controller.add_node(NodeKind::SinkViewer, params(&[])).unwrap();
    controller.connect(source, "table", viewer, "table").unwrap();
    controller.run(viewer).unwrap();
    let fingerprint = controller.graph().fingerprint(viewer);

    controller
        .move_node(source, Position::new(240.0, -32.5))
        .unwrap();
    assert_eq!(controller.graph().fingerprint(viewer), fingerprint);
    assert!(controller.result(viewer).is_some());

    let report = controller.run(viewer).unwrap();
    assert!(report.executed.is_empty());
    assert_eq!(engine.calls(), 2);
}

#[test]
fn test_identical_sources_share_one_result() {
    let engine = CountingEngine::new();
    let mut controller = PipelineController::with_engine(config(2), engine.clone());
    let a = numbers(&mut controller, 5);
    let b = numbers(&mut controller, 5);
    assert_eq!(controller.graph().fingerprint(a), controller.graph().fingerprint(b));

    let union = controller.add_node(NodeKind::Union, params(&[])).unwrap();
    controller.connect(a, "table", union, "tables").unwrap();
    controller.connect(b, "table", union, "tables").unwrap();

    let report = controller.run(union).unwrap();
    assert_eq!(report.target_result().unwrap().rows(), 10);
    // One collect for the shared source, one for the union.
    assert_eq!(engine.calls(), 2);
    assert_eq!(controller.scheduler().cache().len(), 2);
}

#[test]
fn test_concurrent_evaluations_execute_each_node_once() {
    let engine = CountingEngine::with_delay(Duration::from_millis(60));
    let scheduler = Arc::new(Scheduler::new(&config(4), engine.clone()));
    let (graph, [_, _, viewer]) = chain(12);
    let graph = Arc::new(graph);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let scheduler = Arc::clone(&scheduler);
            let graph = Arc::clone(&graph);
            thread::spawn(move || scheduler.evaluate(&graph, viewer))
        })
        .collect();

    for handle in handles {
        let result = handle.join().unwrap().unwrap();
        assert_eq!(result.rows(), 10);
    }
    assert_eq!(engine.calls(), 3);
    assert_eq!(scheduler.stats().executions, 3);
    assert_eq!(scheduler.stats().evaluations, 4);
}

#[test]
fn test_cancelled_evaluation_caches_nothing() {
    let engine = CountingEngine::with_delay(Duration::from_millis(500));
    let mut controller = PipelineController::with_engine(config(2), engine.clone());
    let source = numbers(&mut controller, 8);
    let viewer = controller.add_node(NodeKind::SinkViewer, params(&[])).unwrap();
    controller.connect(source, "table", viewer, "table").unwrap();

    let handle = controller.submit(viewer).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(controller.cancel(handle.id()));

    let report = controller.complete(handle).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.outcome(viewer), Some(&NodeOutcome::Skipped));
    assert!(matches!(
        report.target_result(),
        Err(ExecutionError::Cancelled(_))
    ));
    assert!(controller.scheduler().cache().is_empty());
    assert!(controller.result(viewer).is_none());
    assert!(engine.calls() <= 1);
}

#[test]
fn test_cancel_only_registered_evaluations() {
    let controller = PipelineController::new(config(1));
    assert!(!controller.cancel(EvaluationId(999)));

    let ticket = controller.scheduler().start();
    assert!(controller.cancel(ticket.id));
    assert!(ticket.interrupt().is_triggered());
}

#[test]
fn test_edit_during_background_run_discards_stale_results() {
    let engine = CountingEngine::with_delay(Duration::from_millis(100));
    let mut controller = PipelineController::with_engine(config(2), engine.clone());
    let source = numbers(&mut controller, 8);
    let first = controller
        .add_node(NodeKind::RowsFirst, params(&[("count", 3i64.into())]))
        .unwrap();
    controller.connect(source, "table", first, "table").unwrap();

    let handle = controller.submit(first).unwrap();
    controller
        .set_parameters(first, params(&[("count", 5i64.into())]))
        .unwrap();
    let report = controller.complete(handle).unwrap();

    // The evaluation itself succeeded against its snapshot...
    assert_eq!(report.target_result().unwrap().rows(), 3);
    // ...but only the unchanged source is published.
    assert!(controller.result(first).is_none());
    assert!(controller.result(source).is_some());

    assert_eq!(controller.evaluate(first).unwrap().rows(), 5);
}

#[test]
fn test_engine_failure_blocks_descendants() {
    let mut engine = MockEngine::new();
    engine.expect_name().return_const("mock");
    engine
        .expect_collect()
        .returning(|_, _, _| Err(EngineError::Io("disk unplugged".into())));
    engine.expect_estimate_size().return_const(0usize);

    let scheduler = Scheduler::new(&config(2), Arc::new(engine));
    let (graph, [source, filter, viewer]) = chain(4);
    let report = scheduler
        .run(&graph, viewer, EvaluateOptions::full())
        .unwrap();

    match report.outcome(source) {
        Some(NodeOutcome::Error(ExecutionError::EngineExecution { node, message })) => {
            assert_eq!(*node, source);
            assert!(message.contains("disk unplugged"));
        }
        other => panic!("expected an engine failure, got {:?}", other),
    }
    assert_eq!(report.outcome(filter), Some(&NodeOutcome::Blocked { cause: source }));
    assert_eq!(report.outcome(viewer), Some(&NodeOutcome::Blocked { cause: source }));
}

#[test]
fn test_cache_stays_within_memory_budget() {
    let mut config: PipelineConfig = config(1);
    config.cache.memory_budget_bytes = 0;
    let scheduler = Scheduler::new(&config, Arc::new(witt_pipeline::engine::MemoryEngine::new()));
    let (graph, [_, _, viewer]) = chain(50);

    let result = scheduler.evaluate(&graph, viewer).unwrap();
    assert_eq!(result.rows(), 48);
    assert_eq!(scheduler.cache().used_bytes(), 0);
    assert!(scheduler.cache().stats().evictions >= 1);
}

#[test]
fn test_failures_are_reused_by_default() {
    let mut engine = MockEngine::new();
    engine.expect_name().return_const("mock");
    engine
        .expect_collect()
        .times(1)
        .returning(|_, _, _| Err(EngineError::Parse("bad row".into())));
    engine.expect_estimate_size().return_const(0usize);

    let scheduler = Scheduler::new(&config(1), Arc::new(engine));
    let (graph, [source, _, _]) = chain(4);

    let first = scheduler.run(&graph, source, EvaluateOptions::full()).unwrap();
    assert!(first.executed.contains(&source));
    let second = scheduler.run(&graph, source, EvaluateOptions::full()).unwrap();
    assert!(second.executed.is_empty());
    assert!(matches!(
        second.target_result(),
        Err(ExecutionError::EngineExecution { .. })
    ));
}

#[test]
fn test_failures_are_retried_when_enabled() {
    let mut engine = MockEngine::new();
    let mut seq = mockall::Sequence::new();
    engine.expect_name().return_const("mock");
    engine
        .expect_collect()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _, _| Err(EngineError::Io("flaky".into())));
    engine
        .expect_collect()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _, _| Ok(Frame::from_rows(&["n"], vec![vec![1i64.into()]]).unwrap()));
    engine.expect_estimate_size().return_const(64usize);

    let mut config: PipelineConfig = config(1);
    config.cache.retry_failed = true;
    let scheduler = Scheduler::new(&config, Arc::new(engine));
    let (graph, [source, _, _]) = chain(4);

    assert!(scheduler.evaluate(&graph, source).is_err());
    assert_eq!(scheduler.evaluate(&graph, source).unwrap().rows(), 1);
}
