//! The pipeline controller: sole mutation entry point of a pipeline.
//!
//! ```text
//!  edit ──► PipelineGraph::apply ──► History ──► statuses / cache / events
//!
//!  run / preview ──► Scheduler (on a snapshot) ──► publish outcomes
//!  submit ──► thread ──► Scheduler ──► complete() ──► publish if still current
//! ```
//!
//! Readers receive `Arc<PipelineGraph>` snapshots. An edit clones the graph
//! only while a snapshot is alive (`Arc::make_mut`), so a background
//! evaluation keeps seeing the graph it started with.

use super::bridge::{EdgeSnapshot, EventBus, NodeStatus, PipelineEvent, TopologySnapshot};
use super::compiler::DependencyResolver;
use super::definition::PipelineDefinition;
use super::error::{ExecutionError, ExecutionResult, GraphError, GraphResult};
use super::executor::{EvaluateOptions, EvaluationReport, EvaluationTicket, Scheduler};
use super::fingerprint::{Fingerprint, Fingerprinter};
use super::graph::{Change, ChangeRecord, EditOp, PipelineGraph};
use super::history::History;
use super::id::{EdgeId, EvaluationId, NodeId};
use super::node::{Position, ResultHandle};
use super::node_type::NodeKind;
use super::param::Params;
use crate::config::PipelineConfig;
use crate::engine::{DataEngine, MemoryEngine};
use crate::error::Result;
use crossbeam_channel::Receiver;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Nodes an evaluation marked pending, with the status they had before.
type PendingMarks = Vec<(NodeId, Option<NodeStatus>)>;

/// An evaluation running in the background.
#[derive(Debug)]
pub struct EvaluationHandle {
    id: EvaluationId,
    target: NodeId,
    marked: PendingMarks,
    thread: JoinHandle<ExecutionResult<EvaluationReport>>,
}

impl EvaluationHandle {
    pub fn id(&self) -> EvaluationId {
        self.id
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

pub struct PipelineController {
    name: String,
    graph: Arc<PipelineGraph>,
    history: History,
    scheduler: Arc<Scheduler>,
    statuses: BTreeMap<NodeId, NodeStatus>,
    /// Latest published result per node, valid for its current fingerprint.
    results: HashMap<NodeId, ResultHandle>,
    bus: EventBus,
    config: PipelineConfig,
}

impl PipelineController {
    /// Controller over an empty pipeline, using the in-memory engine.
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_engine(config, Arc::new(MemoryEngine::new()))
    }

    pub fn with_engine(config: PipelineConfig, engine: Arc<dyn DataEngine>) -> Self {
        let scheduler = Arc::new(Scheduler::new(&config, engine));
        Self::with_scheduler(config, scheduler)
    }

    /// Controller sharing a scheduler (and therefore its cache).
    pub fn with_scheduler(config: PipelineConfig, scheduler: Arc<Scheduler>) -> Self {
        let fingerprinter = Fingerprinter::new(config.fingerprint.algorithm);
        Self {
            name: String::from("untitled"),
            graph: Arc::new(PipelineGraph::new(fingerprinter)),
            history: History::new(config.history.depth),
            scheduler,
            statuses: BTreeMap::new(),
            results: HashMap::new(),
            bus: EventBus::new(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    /// Immutable snapshot of the current graph.
    pub fn snapshot(&self) -> Arc<PipelineGraph> {
        Arc::clone(&self.graph)
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        self.bus.subscribe()
    }

    pub fn status(&self, node: NodeId) -> NodeStatus {
        self.statuses.get(&node).cloned().unwrap_or_default()
    }

    /// Published result of a node, if it is current.
    pub fn result(&self, node: NodeId) -> Option<&ResultHandle> {
        self.results.get(&node)
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ==================== Persistence ====================

    pub fn definition(&self) -> PipelineDefinition {
        PipelineDefinition::from_graph(&self.graph, self.name.clone())
    }

    /// Replace the pipeline with `definition`. History is cleared.
    pub fn load(&mut self, definition: &PipelineDefinition) -> Result<()> {
        let graph = definition.to_graph(self.graph.fingerprinter())?;
        self.name = definition.name.clone();
        self.graph = Arc::new(graph);
        self.history.clear();
        self.statuses.clear();
        self.results.clear();
        self.invalidate_dead();
        tracing::info!(
            "Loaded pipeline '{}' with {} node(s)",
            self.name,
            self.graph.node_count()
        );
        self.bus
            .publish(PipelineEvent::GraphLoaded(TopologySnapshot::of(&self.graph)));
        Ok(())
    }

    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let definition = PipelineDefinition::load(path)?;
        self.load(&definition)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<PipelineDefinition> {
        let mut definition = self.definition();
        definition.save(path)?;
        Ok(definition)
    }

    // ==================== Edits ====================

    /// Apply one edit and record it for undo.
    pub fn apply(&mut self, op: EditOp) -> GraphResult<ChangeRecord> {
        let label = op.label();
        let record = self.apply_unrecorded(op)?;
        self.history.record(record.inverse.clone(), label);
        Ok(record)
    }

    fn apply_unrecorded(&mut self, op: EditOp) -> GraphResult<ChangeRecord> {
        let label = op.label();
        let record = Arc::make_mut(&mut self.graph).apply(op).map_err(|err| {
            tracing::warn!("Rejected {}: {}", label, err);
            err
        })?;
        self.after_edit(&record);
        Ok(record)
    }

    pub fn add_node(&mut self, kind: NodeKind, params: Params) -> GraphResult<NodeId> {
        self.add_node_at(kind, params, Position::default())
    }

    pub fn add_node_at(
        &mut self,
        kind: NodeKind,
        params: Params,
        position: Position,
    ) -> GraphResult<NodeId> {
        let record = self.apply(EditOp::AddNode {
            id: None,
            kind,
            params,
            position,
        })?;
        match record.change {
            Change::NodeAdded(id) => Ok(id),
            _ => Err(GraphError::UnknownKind(kind.id().to_string())),
        }
    }

    pub fn remove_node(&mut self, node: NodeId) -> GraphResult<ChangeRecord> {
        self.apply(EditOp::RemoveNode(node))
    }

    pub fn connect(
        &mut self,
        source: NodeId,
        source_socket: &str,
        target: NodeId,
        target_socket: &str,
    ) -> GraphResult<EdgeId> {
        let record = self.apply(EditOp::Connect {
            id: None,
            source,
            source_socket: source_socket.to_string(),
            target,
            target_socket: target_socket.to_string(),
        })?;
        match record.change {
            Change::EdgeAdded(id) => Ok(id),
            _ => Err(GraphError::UnknownNode(target)),
        }
    }

    pub fn disconnect(&mut self, edge: EdgeId) -> GraphResult<ChangeRecord> {
        self.apply(EditOp::Disconnect(edge))
    }

    pub fn set_parameters(&mut self, node: NodeId, updates: Params) -> GraphResult<ChangeRecord> {
        self.apply(EditOp::SetParameters { node, updates })
    }

    pub fn move_node(&mut self, node: NodeId, position: Position) -> GraphResult<ChangeRecord> {
        self.apply(EditOp::MoveNode { node, position })
    }

    /// Revert the latest edit. `Ok(None)` when there is nothing to undo.
    pub fn undo(&mut self) -> GraphResult<Option<ChangeRecord>> {
        let Some(entry) = self.history.pop_undo() else {
            return Ok(None);
        };
        tracing::debug!("Undo {}", entry.label);
        let record = match self.apply_unrecorded(entry.inverse.clone()) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!("Undo of {} failed: {}", entry.label, err);
                self.history.restore_undo(entry);
                return Err(err);
            }
        };
        self.history.push_redo(record.inverse.clone(), entry.label);
        Ok(Some(record))
    }

    /// Re-apply the latest undone edit. `Ok(None)` when there is nothing to redo.
    pub fn redo(&mut self) -> GraphResult<Option<ChangeRecord>> {
        let Some(entry) = self.history.pop_redo() else {
            return Ok(None);
        };
        tracing::debug!("Redo {}", entry.label);
        let record = match self.apply_unrecorded(entry.inverse.clone()) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!("Redo of {} failed: {}", entry.label, err);
                self.history.restore_redo(entry);
                return Err(err);
            }
        };
        self.history
            .push_undo_after_redo(record.inverse.clone(), entry.label);
        Ok(Some(record))
    }

    fn after_edit(&mut self, record: &ChangeRecord) {
        match &record.change {
            Change::NodeAdded(node) => {
                if let Some(n) = self.graph.node(*node) {
                    self.bus.publish(PipelineEvent::NodeAdded {
                        node: *node,
                        kind: n.kind,
                    });
                }
            }
            Change::NodeRemoved { node, edges } => {
                for edge in edges {
                    self.bus.publish(PipelineEvent::EdgeRemoved(*edge));
                }
                self.statuses.remove(node);
                self.results.remove(node);
                self.bus.publish(PipelineEvent::NodeRemoved(*node));
            }
            Change::NodeRestored { node, edges } => {
                if let Some(n) = self.graph.node(*node) {
                    self.bus.publish(PipelineEvent::NodeAdded {
                        node: *node,
                        kind: n.kind,
                    });
                }
                for edge in edges {
                    self.publish_edge_added(*edge);
                }
            }
            Change::EdgeAdded(edge) => self.publish_edge_added(*edge),
            Change::EdgeRemoved(edge) => self.bus.publish(PipelineEvent::EdgeRemoved(*edge)),
            Change::ParametersChanged(node) => self.bus.publish(PipelineEvent::NodeUpdated(*node)),
            Change::NodeMoved(node) => {
                if let Some(n) = self.graph.node(*node) {
                    self.bus.publish(PipelineEvent::NodeMoved {
                        node: *node,
                        position: n.position,
                    });
                }
                return;
            }
        }

        for node in &record.refingerprinted {
            self.results.remove(node);
            self.set_status(*node, NodeStatus::Idle);
        }
        self.invalidate_dead();
    }

    fn publish_edge_added(&self, edge: EdgeId) {
        if let Some(e) = self.graph.edge(edge) {
            self.bus
                .publish(PipelineEvent::EdgeAdded(EdgeSnapshot::from(e)));
        }
    }

    /// Drop cache entries no live node can use any more.
    fn invalidate_dead(&self) {
        let live: HashSet<Fingerprint> = self.graph.nodes().map(|n| n.fingerprint).collect();
        self.scheduler.cache().invalidate_not_in(&live);
    }

    fn set_status(&mut self, node: NodeId, status: NodeStatus) {
        if self.statuses.get(&node) == Some(&status) {
            return;
        }
        if status == NodeStatus::Idle && !self.statuses.contains_key(&node) {
            return;
        }
        self.statuses.insert(node, status.clone());
        self.bus
            .publish(PipelineEvent::NodeStatusChanged { node, status });
    }

    // ==================== Evaluation ====================

    /// Fully evaluate `target` and return its result.
    pub fn evaluate(&mut self, target: NodeId) -> ExecutionResult<ResultHandle> {
        self.run(target)?.target_result()
    }

    /// Evaluate `target` with the configured preview row count.
    pub fn preview(&mut self, target: NodeId) -> ExecutionResult<ResultHandle> {
        let rows = self.config.preview.rows;
        self.preview_rows(target, rows)
    }

    pub fn preview_rows(&mut self, target: NodeId, rows: usize) -> ExecutionResult<ResultHandle> {
        self.run_with(target, EvaluateOptions::preview(rows))?
            .target_result()
    }

    /// Fully evaluate `target` and report every planned node.
    pub fn run(&mut self, target: NodeId) -> ExecutionResult<EvaluationReport> {
        self.run_with(target, EvaluateOptions::full())
    }

    pub fn run_with(
        &mut self,
        target: NodeId,
        options: EvaluateOptions,
    ) -> ExecutionResult<EvaluationReport> {
        let snapshot = self.snapshot();
        let (ticket, marked) = self.begin(&snapshot, target)?;
        let id = ticket.id;
        match self.scheduler.run_ticket(&snapshot, target, options, ticket) {
            Ok(report) => {
                self.publish_report(&report);
                Ok(report)
            }
            Err(err) => {
                self.abort(id, target, marked, &err);
                Err(err)
            }
        }
    }

    /// Start evaluating `target` on a background thread against the current
    /// snapshot. Edits may continue; call [`PipelineController::complete`]
    /// to publish the outcome.
    pub fn submit(&mut self, target: NodeId) -> ExecutionResult<EvaluationHandle> {
        self.submit_with(target, EvaluateOptions::full())
    }

    pub fn submit_with(
        &mut self,
        target: NodeId,
        options: EvaluateOptions,
    ) -> ExecutionResult<EvaluationHandle> {
        let snapshot = self.snapshot();
        let (ticket, marked) = self.begin(&snapshot, target)?;
        let id = ticket.id;
        let scheduler = Arc::clone(&self.scheduler);
        let spawned = thread::Builder::new()
            .name(format!("witt-eval-{}", id.0))
            .spawn(move || scheduler.run_ticket(&snapshot, target, options, ticket));
        match spawned {
            Ok(thread) => Ok(EvaluationHandle {
                id,
                target,
                marked,
                thread,
            }),
            Err(e) => {
                let err = ExecutionError::EngineExecution {
                    node: target,
                    message: format!("failed to start evaluation thread: {}", e),
                };
                self.abort(id, target, marked, &err);
                Err(err)
            }
        }
    }

    /// Wait for a submitted evaluation and publish the results that still
    /// match the current graph.
    pub fn complete(&mut self, handle: EvaluationHandle) -> ExecutionResult<EvaluationReport> {
        let EvaluationHandle {
            id,
            target,
            marked,
            thread,
        } = handle;
        let result = thread.join().unwrap_or_else(|_| {
            tracing::error!("Evaluation thread of {} panicked", id);
            Err(ExecutionError::Cancelled(id))
        });
        match result {
            Ok(report) => {
                self.publish_report(&report);
                Ok(report)
            }
            Err(err) => {
                self.abort(id, target, marked, &err);
                Err(err)
            }
        }
    }

    pub fn cancel(&self, id: EvaluationId) -> bool {
        self.scheduler.cancel(id)
    }

    /// Register an evaluation and mark its plan pending.
    fn begin(
        &mut self,
        snapshot: &PipelineGraph,
        target: NodeId,
    ) -> ExecutionResult<(EvaluationTicket, PendingMarks)> {
        let ancestors = DependencyResolver::ancestors(snapshot, target)
            .map_err(|_| ExecutionError::UnknownNode(target))?;
        let ticket = self.scheduler.start();
        let mut marked = PendingMarks::new();
        for node in ancestors {
            if !matches!(self.statuses.get(&node), Some(NodeStatus::Success { .. })) {
                let previous = self.statuses.insert(node, NodeStatus::Pending);
                marked.push((node, previous));
                self.bus.publish(PipelineEvent::NodeStatusChanged {
                    node,
                    status: NodeStatus::Pending,
                });
            }
        }
        self.bus.publish(PipelineEvent::EvaluationStarted {
            id: ticket.id,
            target,
        });
        Ok((ticket, marked))
    }

    /// Undo the pending marks of an evaluation that produced no report.
    fn abort(&mut self, id: EvaluationId, target: NodeId, marked: PendingMarks, err: &ExecutionError) {
        tracing::warn!("{}: evaluation of {} failed: {}", id, target, err);
        for (node, previous) in marked {
            if self.statuses.get(&node) != Some(&NodeStatus::Pending) {
                continue;
            }
            match previous {
                Some(status) => self.set_status(node, status),
                None => {
                    self.statuses.remove(&node);
                    self.bus.publish(PipelineEvent::NodeStatusChanged {
                        node,
                        status: NodeStatus::Idle,
                    });
                }
            }
        }
        self.bus.publish(PipelineEvent::EvaluationFinished {
            id,
            target,
            success: false,
            cancelled: matches!(err, ExecutionError::Cancelled(_)),
        });
    }

    /// Publish outcomes whose fingerprint still matches the current graph.
    fn publish_report(&mut self, report: &EvaluationReport) {
        let mut stale = 0;
        for (node, outcome) in &report.outcomes {
            let current = self.graph.fingerprint(*node);
            if current.is_none() || current != report.fingerprints.get(node).copied() {
                stale += 1;
                continue;
            }
            match outcome.handle() {
                Some(handle) => {
                    self.results.insert(*node, handle.clone());
                }
                None => {
                    self.results.remove(node);
                }
            }
            self.set_status(*node, NodeStatus::from(outcome));
        }
        if stale > 0 {
            tracing::warn!(
                "{}: discarded {} stale result(s) after concurrent edits",
                report.id,
                stale
            );
        }
        self.bus.publish(PipelineEvent::EvaluationFinished {
            id: report.id,
            target: report.target,
            success: report.target_result().is_ok(),
            cancelled: report.cancelled,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::frame::Value;
    use crate::pipeline::bridge::drain;
    use crate::pipeline::param::ParamValue;

    fn controller() -> PipelineController {
        PipelineController::new(PipelineConfig {
            scheduler: SchedulerConfig { workers: 2 },
            ..PipelineConfig::default()
        })
    }

    fn params(pairs: &[(&str, ParamValue)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn table(ctrl: &mut PipelineController) -> NodeId {
        ctrl.add_node(
            NodeKind::SourceTable,
            params(&[
                ("columns", ParamValue::List(vec!["n".into()])),
                (
                    "rows",
                    ParamValue::List(
                        (1..=5i64)
                            .map(|i| ParamValue::List(vec![i.into()]))
                            .collect(),
                    ),
                ),
            ]),
        )
        .unwrap()
    }

    #[test]
    fn test_undo_redo_add_and_connect() {
        let mut ctrl = controller();
        let src = table(&mut ctrl);
        let first = ctrl.add_node(NodeKind::RowsFirst, Params::new()).unwrap();
        let edge = ctrl.connect(src, "table", first, "table").unwrap();
        assert_eq!(ctrl.graph().edge_count(), 1);

        ctrl.undo().unwrap();
        assert!(ctrl.graph().edge(edge).is_none());
        ctrl.undo().unwrap();
        assert!(!ctrl.graph().contains_node(first));
        assert!(ctrl.can_redo());

        ctrl.redo().unwrap();
        ctrl.redo().unwrap();
        assert!(ctrl.graph().contains_node(first));
        assert!(ctrl.graph().edge(edge).is_some());
        assert!(!ctrl.can_redo());
        assert_eq!(ctrl.undo().unwrap().map(|r| r.change), Some(Change::EdgeRemoved(edge)));
    }

    #[test]
    fn test_undo_restores_parameters_and_fingerprint() {
        let mut ctrl = controller();
        let src = table(&mut ctrl);
        let first = ctrl.add_node(NodeKind::RowsFirst, Params::new()).unwrap();
        ctrl.connect(src, "table", first, "table").unwrap();
        let before = ctrl.graph().fingerprint(first);

        ctrl.set_parameters(first, params(&[("count", 2i64.into())]))
            .unwrap();
        assert_ne!(ctrl.graph().fingerprint(first), before);
        ctrl.undo().unwrap();
        assert_eq!(ctrl.graph().fingerprint(first), before);
    }

    #[test]
    fn test_rejected_edit_is_not_recorded() {
        let mut ctrl = controller();
        let src = table(&mut ctrl);
        let undo_len = ctrl.history().undo_len();
        assert!(ctrl.connect(src, "table", src, "table").is_err());
        assert_eq!(ctrl.history().undo_len(), undo_len);
    }

    #[test]
    fn test_edit_resets_status_and_emits_events() {
        let mut ctrl = controller();
        let events = ctrl.subscribe();
        let src = table(&mut ctrl);
        let first = ctrl.add_node(NodeKind::RowsFirst, Params::new()).unwrap();
        ctrl.connect(src, "table", first, "table").unwrap();

        let handle = ctrl.evaluate(first).unwrap();
        assert_eq!(handle.rows(), 5);
        assert_eq!(ctrl.status(first), NodeStatus::Success { rows: 5 });
        assert!(ctrl.result(first).is_some());

        drain(&events);
        ctrl.set_parameters(first, params(&[("count", 2i64.into())]))
            .unwrap();
        assert_eq!(ctrl.status(first), NodeStatus::Idle);
        assert_eq!(ctrl.status(src), NodeStatus::Success { rows: 5 });
        assert!(ctrl.result(first).is_none());
        assert_eq!(
            drain(&events),
            vec![
                PipelineEvent::NodeUpdated(first),
                PipelineEvent::NodeStatusChanged {
                    node: first,
                    status: NodeStatus::Idle
                },
            ]
        );
    }

    #[test]
    fn test_failed_undo_keeps_history_entry() {
        let mut ctrl = controller();
        table(&mut ctrl);
        ctrl.history.record(EditOp::Disconnect(EdgeId(99)), "disconnect");
        let depth = ctrl.history().undo_len();

        assert_eq!(ctrl.undo(), Err(GraphError::UnknownEdge(EdgeId(99))));
        assert_eq!(ctrl.history().undo_len(), depth);
        assert!(!ctrl.can_redo());
    }

    #[test]
    fn test_aborted_evaluation_restores_statuses() {
        let mut ctrl = controller();
        let src = table(&mut ctrl);
        let first = ctrl.add_node(NodeKind::RowsFirst, Params::new()).unwrap();
        ctrl.connect(src, "table", first, "table").unwrap();
        ctrl.statuses.insert(
            src,
            NodeStatus::Error {
                message: "earlier".into(),
            },
        );
        let events = ctrl.subscribe();

        let snapshot = ctrl.snapshot();
        let (ticket, marked) = ctrl.begin(&snapshot, first).unwrap();
        assert_eq!(ctrl.status(first), NodeStatus::Pending);
        ctrl.abort(ticket.id, first, marked, &ExecutionError::Cancelled(ticket.id));

        assert_eq!(ctrl.status(first), NodeStatus::Idle);
        assert!(!ctrl.statuses.contains_key(&first));
        assert!(matches!(ctrl.status(src), NodeStatus::Error { .. }));
        let events = drain(&events);
        assert!(events.contains(&PipelineEvent::NodeStatusChanged {
            node: first,
            status: NodeStatus::Idle,
        }));
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::EvaluationFinished {
                success: false,
                cancelled: true,
                ..
            })
        ));
    }

    #[test]
    fn test_stale_background_results_are_discarded() {
        let mut ctrl = controller();
        let src = table(&mut ctrl);
        let first = ctrl.add_node(NodeKind::RowsFirst, Params::new()).unwrap();
        ctrl.connect(src, "table", first, "table").unwrap();

        let handle = ctrl.submit(first).unwrap();
        ctrl.set_parameters(first, params(&[("count", 1i64.into())]))
            .unwrap();
        let report = ctrl.complete(handle).unwrap();

        assert_eq!(report.target_result().unwrap().rows(), 5);
        // The source is unchanged so its result is published.
        assert_eq!(ctrl.status(src), NodeStatus::Success { rows: 5 });
        assert!(ctrl.result(first).is_none());
        assert_ne!(ctrl.status(first), NodeStatus::Success { rows: 5 });

        let fresh = ctrl.evaluate(first).unwrap();
        assert_eq!(fresh.frame().unwrap().row(0), vec![Value::Int(1)]);
        assert_eq!(fresh.rows(), 1);
    }

    #[test]
    fn test_definition_round_trip_through_controller() {
        let mut ctrl = controller();
        let src = table(&mut ctrl);
        let first = ctrl.add_node(NodeKind::RowsFirst, Params::new()).unwrap();
        ctrl.connect(src, "table", first, "table").unwrap();
        ctrl.set_name("numbers");
        let definition = ctrl.definition();

        let mut other = controller();
        let events = other.subscribe();
        other.load(&definition).unwrap();
        assert_eq!(other.definition(), definition);
        assert_eq!(other.name(), "numbers");
        assert!(!other.can_undo());
        assert!(matches!(drain(&events).as_slice(), [PipelineEvent::GraphLoaded(_)]));
        assert_eq!(other.evaluate(first).unwrap().rows(), 5);
    }

    #[test]
    fn test_evaluate_unknown_node() {
        let mut ctrl = controller();
        assert_eq!(
            ctrl.evaluate(NodeId(9)).unwrap_err(),
            ExecutionError::UnknownNode(NodeId(9))
        );
    }
}
