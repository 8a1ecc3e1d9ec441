//! Events published to controller subscribers

mod common;

use common::builders::{config, numbers, params};
use witt_pipeline::pipeline::bridge::drain;
use witt_pipeline::pipeline::{NodeKind, NodeStatus, PipelineEvent, Position};

#[test]
fn test_evaluation_lifecycle_events() {
    let mut controller = witt_pipeline::PipelineController::new(config(2));
    let source = numbers(&mut controller, 3);
    let viewer = controller.add_node(NodeKind::SinkViewer, params(&[])).unwrap();
    controller.connect(source, "table", viewer, "table").unwrap();

    let events = controller.subscribe();
    controller.evaluate(viewer).unwrap();
    let events = drain(&events);

    let started = events
        .iter()
        .position(|e| matches!(e, PipelineEvent::EvaluationStarted { target, .. } if *target == viewer))
        .expect("evaluation started");
    let finished = events
        .iter()
        .position(|e| {
            matches!(
                e,
                PipelineEvent::EvaluationFinished {
                    target,
                    success: true,
                    cancelled: false,
                    ..
                } if *target == viewer
            )
        })
        .expect("evaluation finished");
    assert!(started < finished);

    assert!(events.contains(&PipelineEvent::NodeStatusChanged {
        node: viewer,
        status: NodeStatus::Pending,
    }));
    assert!(events.contains(&PipelineEvent::NodeStatusChanged {
        node: viewer,
        status: NodeStatus::Success { rows: 3 },
    }));
}

#[test]
fn test_topology_events() {
    let mut controller = witt_pipeline::PipelineController::new(config(1));
    let events = controller.subscribe();

    let source = numbers(&mut controller, 3);
    let viewer = controller.add_node(NodeKind::SinkViewer, params(&[])).unwrap();
    let edge = controller.connect(source, "table", viewer, "table").unwrap();
    controller.move_node(viewer, Position::new(10.0, 20.0)).unwrap();
    controller.remove_node(source).unwrap();

    let events = drain(&events);
    assert!(matches!(events[0], PipelineEvent::NodeAdded { node, kind: NodeKind::SourceTable } if node == source));
    assert!(matches!(events[1], PipelineEvent::NodeAdded { node, kind: NodeKind::SinkViewer } if node == viewer));
    assert!(matches!(&events[2], PipelineEvent::EdgeAdded(snapshot) if snapshot.id == edge));
    assert_eq!(
        events[3],
        PipelineEvent::NodeMoved {
            node: viewer,
            position: Position::new(10.0, 20.0),
        }
    );
    assert!(events.contains(&PipelineEvent::EdgeRemoved(edge)));
    assert!(events.contains(&PipelineEvent::NodeRemoved(source)));
}

#[test]
fn test_dropped_subscriber_is_pruned() {
    let mut controller = witt_pipeline::PipelineController::new(config(1));
    let kept = controller.subscribe();
    drop(controller.subscribe());

    numbers(&mut controller, 1);
    assert_eq!(drain(&kept).len(), 1);
}
