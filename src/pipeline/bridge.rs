//! Boundary between the pipeline controller and a view layer.
//!
//! The controller publishes [`PipelineEvent`]s on an [`EventBus`]; every
//! subscriber gets its own channel and drains it at its own pace. Subscribers
//! that dropped their receiver are pruned on the next publish.

use crate::pipeline::executor::NodeOutcome;
use crate::pipeline::graph::{Edge, PipelineGraph};
use crate::pipeline::id::{EdgeId, EvaluationId, NodeId};
use crate::pipeline::node::Position;
use crate::pipeline::node_type::NodeKind;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::Mutex;

/// Channel capacity per subscriber. Events beyond it are dropped for that
/// subscriber only.
const EVENT_CHANNEL_CAPACITY: usize = 10_000;

/// Display state of a node.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NodeStatus {
    /// No result for the current fingerprint.
    #[default]
    Idle,
    /// Part of a running evaluation.
    Pending,
    Success {
        rows: usize,
    },
    Error {
        message: String,
    },
    /// An upstream node failed.
    Blocked {
        cause: NodeId,
    },
}

impl From<&NodeOutcome> for NodeStatus {
    fn from(outcome: &NodeOutcome) -> Self {
        match outcome {
            NodeOutcome::Success(handle) => NodeStatus::Success {
                rows: handle.rows(),
            },
            NodeOutcome::Error(err) => NodeStatus::Error {
                message: err.to_string(),
            },
            NodeOutcome::Blocked { cause } => NodeStatus::Blocked { cause: *cause },
            NodeOutcome::Skipped => NodeStatus::Idle,
        }
    }
}

/// Snapshot of a single pipeline node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: &'static str,
    pub position: Position,
}

/// Snapshot of a single pipeline edge.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSnapshot {
    pub id: EdgeId,
    pub source: NodeId,
    pub source_socket: String,
    pub target: NodeId,
    pub target_socket: String,
}

impl From<&Edge> for EdgeSnapshot {
    fn from(edge: &Edge) -> Self {
        Self {
            id: edge.id,
            source: edge.source,
            source_socket: edge.source_socket.clone(),
            target: edge.target,
            target_socket: edge.target_socket.clone(),
        }
    }
}

/// Complete topology snapshot of the pipeline graph.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TopologySnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
}

impl TopologySnapshot {
    pub fn of(graph: &PipelineGraph) -> Self {
        Self {
            nodes: graph
                .nodes()
                .map(|n| NodeSnapshot {
                    id: n.id,
                    kind: n.kind,
                    name: n.kind.display_name(),
                    position: n.position,
                })
                .collect(),
            edges: graph.edges().map(EdgeSnapshot::from).collect(),
        }
    }
}

/// Notifications sent from the controller to the view layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    NodeAdded { node: NodeId, kind: NodeKind },
    NodeRemoved(NodeId),
    /// Parameters changed.
    NodeUpdated(NodeId),
    NodeMoved { node: NodeId, position: Position },
    EdgeAdded(EdgeSnapshot),
    EdgeRemoved(EdgeId),
    NodeStatusChanged { node: NodeId, status: NodeStatus },
    EvaluationStarted { id: EvaluationId, target: NodeId },
    EvaluationFinished {
        id: EvaluationId,
        target: NodeId,
        success: bool,
        cancelled: bool,
    },
    /// The whole graph was replaced (load, new).
    GraphLoaded(TopologySnapshot),
}

/// Fan-out of events to any number of subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<PipelineEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        let (tx, rx) = bounded(EVENT_CHANNEL_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn publish(&self, event: PipelineEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!("Event channel full, dropping {:?}", event);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

/// Drain all pending events from a subscription.
pub fn drain(rx: &Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    rx.try_iter().collect()
}
