//! The pipeline graph: an arena of nodes and edges indexed by id.
//!
//! ```text
//! nodes: [Some(n0), Some(n1), None, Some(n3)]     slot = NodeId
//! edges: [Some(e0: n0.table -> n1.table), None]   slot = EdgeId
//! ```
//!
//! Removed slots stay `None`, so ids are never reused. Every mutation goes
//! through [`PipelineGraph::apply`], which validates the [`EditOp`] before
//! touching anything, refreshes the fingerprints of the mutated node and
//! everything downstream, and returns a [`ChangeRecord`] carrying the inverse
//! operation for undo.
//!
//! Invariants held after every successful edit:
//! - the graph is acyclic;
//! - every edge joins live nodes through declared, type-compatible sockets;
//! - single-arity inputs have at most one incoming edge;
//! - every node stores its complete, schema-valid parameter map and the
//!   fingerprint derived from it and its upstream.

use super::compiler::DependencyResolver;
use super::error::{GraphError, GraphResult};
use super::fingerprint::{Fingerprint, Fingerprinter, UpstreamInput};
use super::id::{EdgeId, NodeId};
use super::node::{Node, Position};
use super::node_type::NodeKind;
use super::param::{self, Params};
use super::port::Arity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Largest id accepted for explicitly numbered nodes and edges.
pub const MAX_EXPLICIT_ID: u32 = 1 << 24;

/// A connection from an output socket to an input socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub source_socket: String,
    pub target: NodeId,
    pub target_socket: String,
}

/// A single, invertible graph edit.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOp {
    /// Add a node; `id: None` allocates the next free id.
    AddNode {
        id: Option<NodeId>,
        kind: NodeKind,
        params: Params,
        position: Position,
    },
    /// Remove a node and every edge touching it.
    RemoveNode(NodeId),
    /// Re-insert a removed node together with its edges.
    RestoreNode { node: Node, edges: Vec<Edge> },
    Connect {
        id: Option<EdgeId>,
        source: NodeId,
        source_socket: String,
        target: NodeId,
        target_socket: String,
    },
    Disconnect(EdgeId),
    /// Merge `updates` into the node's parameters (`Null` resets a key).
    SetParameters { node: NodeId, updates: Params },
    /// Replace the complete parameter map.
    ReplaceParameters { node: NodeId, params: Params },
    MoveNode { node: NodeId, position: Position },
}

impl EditOp {
    /// Short label for history and logs.
    pub fn label(&self) -> &'static str {
        match self {
            EditOp::AddNode { .. } => "add node",
            EditOp::RemoveNode(_) => "remove node",
            EditOp::RestoreNode { .. } => "restore node",
            EditOp::Connect { .. } => "connect",
            EditOp::Disconnect(_) => "disconnect",
            EditOp::SetParameters { .. } | EditOp::ReplaceParameters { .. } => "set parameters",
            EditOp::MoveNode { .. } => "move node",
        }
    }
}

/// What an applied edit changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    NodeAdded(NodeId),
    NodeRemoved { node: NodeId, edges: Vec<EdgeId> },
    NodeRestored { node: NodeId, edges: Vec<EdgeId> },
    EdgeAdded(EdgeId),
    EdgeRemoved(EdgeId),
    ParametersChanged(NodeId),
    NodeMoved(NodeId),
}

/// Result of a successful edit.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub change: Change,
    /// Applying this operation undoes the edit.
    pub inverse: EditOp,
    /// Nodes whose fingerprint changed, in topological order.
    pub refingerprinted: Vec<NodeId>,
}

/// Arena-backed DAG of nodes.
#[derive(Debug, Clone, Default)]
pub struct PipelineGraph {
    nodes: Vec<Option<Node>>,
    edges: Vec<Option<Edge>>,
    fingerprinter: Fingerprinter,
    generation: u64,
}

impl PipelineGraph {
    pub fn new(fingerprinter: Fingerprinter) -> Self {
        Self {
            fingerprinter,
            ..Self::default()
        }
    }

    pub fn fingerprinter(&self) -> Fingerprinter {
        self.fingerprinter
    }

    /// Incremented by every successful edit.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // ==================== Queries ====================

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn fingerprint(&self, id: NodeId) -> Option<Fingerprint> {
        self.node(id).map(|n| n.fingerprint)
    }

    /// Live nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.iter().flatten()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes().map(|n| n.id).collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.index()).and_then(Option::as_ref)
    }

    /// Live edges in id order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.iter().flatten()
    }

    pub fn edge_count(&self) -> usize {
        self.edges().count()
    }

    /// Next id `add_node` would allocate.
    pub fn next_node_id(&self) -> NodeId {
        NodeId(self.nodes.len() as u32)
    }

    /// Incoming edges ordered by input socket declaration, then edge id.
    pub fn incoming(&self, id: NodeId) -> Vec<&Edge> {
        let Some(node) = self.node(id) else {
            return Vec::new();
        };
        let descriptor = node.kind.descriptor();
        let mut edges: Vec<&Edge> = self.edges().filter(|e| e.target == id).collect();
        // Stable: edges within a socket keep id order.
        edges.sort_by_key(|e| {
            descriptor
                .input(&e.target_socket)
                .map(|(i, _)| i)
                .unwrap_or(usize::MAX)
        });
        edges
    }

    /// Incoming edges grouped per declared input socket.
    pub fn inputs_by_socket(&self, id: NodeId) -> Vec<Vec<&Edge>> {
        let Some(node) = self.node(id) else {
            return Vec::new();
        };
        let inputs = node.kind.descriptor().inputs;
        let mut grouped: Vec<Vec<&Edge>> = vec![Vec::new(); inputs.len()];
        for edge in self.edges().filter(|e| e.target == id) {
            if let Some(i) = inputs.iter().position(|s| s.name == edge.target_socket) {
                grouped[i].push(edge);
            }
        }
        grouped
    }

    pub fn outgoing(&self, id: NodeId) -> Vec<&Edge> {
        self.edges().filter(|e| e.source == id).collect()
    }

    /// Distinct upstream nodes.
    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        let set: BTreeSet<NodeId> = self
            .edges()
            .filter(|e| e.target == id)
            .map(|e| e.source)
            .collect();
        set.into_iter().collect()
    }

    /// Distinct downstream nodes.
    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        let set: BTreeSet<NodeId> = self.outgoing(id).iter().map(|e| e.target).collect();
        set.into_iter().collect()
    }

    /// True when a directed path leads from `from` to `to` (or they are equal).
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut seen = BTreeSet::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if seen.insert(node) {
                stack.extend(self.successors(node));
            }
        }
        false
    }

    // ==================== Edits ====================

    pub fn add_node(&mut self, kind: NodeKind, params: Params) -> GraphResult<NodeId> {
        let record = self.apply(EditOp::AddNode {
            id: None,
            kind,
            params,
            position: Position::default(),
        })?;
        match record.change {
            Change::NodeAdded(id) => Ok(id),
            _ => Err(GraphError::UnknownKind(kind.id().to_string())),
        }
    }

    pub fn remove_node(&mut self, id: NodeId) -> GraphResult<ChangeRecord> {
        self.apply(EditOp::RemoveNode(id))
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

    /// Validate and apply one edit. On error the graph is unchanged.
    pub fn apply(&mut self, op: EditOp) -> GraphResult<ChangeRecord> {
        let record = match op {
            EditOp::AddNode {
                id,
                kind,
                params,
                position,
            } => self.apply_add(id, kind, &params, position)?,
            EditOp::RemoveNode(id) => self.apply_remove(id)?,
            EditOp::RestoreNode { node, edges } => self.apply_restore(node, edges)?,
            EditOp::Connect {
                id,
                source,
                source_socket,
                target,
                target_socket,
            } => self.apply_connect(id, source, source_socket, target, target_socket)?,
            EditOp::Disconnect(id) => self.apply_disconnect(id)?,
            EditOp::SetParameters { node, updates } => {
                let current = self.node(node).ok_or(GraphError::UnknownNode(node))?;
                let schema = current.kind.descriptor().params;
                let merged = param::merge(schema, &current.params, &updates)
                    .map_err(|(name, message)| GraphError::InvalidParameter {
                        node,
                        name,
                        message,
                    })?;
                self.apply_replace(node, merged)?
            }
            EditOp::ReplaceParameters { node, params } => {
                let current = self.node(node).ok_or(GraphError::UnknownNode(node))?;
                let schema = current.kind.descriptor().params;
                let validated = param::merge(schema, &Params::new(), &params).map_err(
                    |(name, message)| GraphError::InvalidParameter {
                        node,
                        name,
                        message,
                    },
                )?;
                self.apply_replace(node, validated)?
            }
            EditOp::MoveNode { node, position } => {
                let slot = self.node_mut(node)?;
                let old = std::mem::replace(&mut slot.position, position);
                ChangeRecord {
                    change: Change::NodeMoved(node),
                    inverse: EditOp::MoveNode {
                        node,
                        position: old,
                    },
                    refingerprinted: Vec::new(),
                }
            }
        };
        self.generation += 1;
        Ok(record)
    }

    fn node_mut(&mut self, id: NodeId) -> GraphResult<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(GraphError::UnknownNode(id))
    }

    fn check_explicit_id(id: u32) -> GraphResult<()> {
        if id > MAX_EXPLICIT_ID {
            return Err(GraphError::IdOutOfRange(id));
        }
        Ok(())
    }

    fn insert_node(&mut self, node: Node) {
        let index = node.id.index();
        if index >= self.nodes.len() {
            self.nodes.resize_with(index + 1, || None);
        }
        self.nodes[index] = Some(node);
    }

    fn insert_edge(&mut self, edge: Edge) {
        let index = edge.id.index();
        if index >= self.edges.len() {
            self.edges.resize_with(index + 1, || None);
        }
        self.edges[index] = Some(edge);
    }

    fn apply_add(
        &mut self,
        id: Option<NodeId>,
        kind: NodeKind,
        params: &Params,
        position: Position,
    ) -> GraphResult<ChangeRecord> {
        let id = match id {
            Some(id) => {
                Self::check_explicit_id(id.0)?;
                if self.contains_node(id) {
                    return Err(GraphError::NodeIdInUse(id));
                }
                id
            }
            None => self.next_node_id(),
        };
        let schema = kind.descriptor().params;
        let params = param::merge(schema, &param::defaults(schema), params).map_err(
            |(name, message)| GraphError::InvalidParameter {
                node: id,
                name,
                message,
            },
        )?;
        let fingerprint = self.fingerprinter.node(kind, &params, &[]);
        self.insert_node(Node {
            id,
            kind,
            params,
            position,
            fingerprint,
        });
        tracing::debug!("Added {} ({})", id, kind.id());

        Ok(ChangeRecord {
            change: Change::NodeAdded(id),
            inverse: EditOp::RemoveNode(id),
            refingerprinted: vec![id],
        })
    }

    fn apply_remove(&mut self, id: NodeId) -> GraphResult<ChangeRecord> {
        let node = self.node(id).cloned().ok_or(GraphError::UnknownNode(id))?;
        let edges: Vec<Edge> = self
            .edges()
            .filter(|e| e.source == id || e.target == id)
            .cloned()
            .collect();
        let downstream: Vec<NodeId> = edges
            .iter()
            .filter(|e| e.source == id && e.target != id)
            .map(|e| e.target)
            .collect();

        for edge in &edges {
            self.edges[edge.id.index()] = None;
        }
        self.nodes[id.index()] = None;
        let refingerprinted = self.refresh(&downstream);
        tracing::debug!("Removed {} and {} edge(s)", id, edges.len());

        Ok(ChangeRecord {
            change: Change::NodeRemoved {
                node: id,
                edges: edges.iter().map(|e| e.id).collect(),
            },
            inverse: EditOp::RestoreNode { node, edges },
            refingerprinted,
        })
    }

    fn apply_restore(&mut self, node: Node, mut edges: Vec<Edge>) -> GraphResult<ChangeRecord> {
        let id = node.id;
        Self::check_explicit_id(id.0)?;
        if self.contains_node(id) {
            return Err(GraphError::NodeIdInUse(id));
        }
        edges.sort_by_key(|e| e.id);

        // Validate edge by edge against a scratch copy, then swap it in.
        let mut next = self.clone();
        next.insert_node(node);
        for edge in &edges {
            Self::check_explicit_id(edge.id.0)?;
            if next.edge(edge.id).is_some() {
                return Err(GraphError::EdgeIdInUse(edge.id));
            }
            next.check_connect(edge.source, &edge.source_socket, edge.target, &edge.target_socket)?;
            next.insert_edge(edge.clone());
        }
        let mut refingerprinted = next.refresh(&[id]);
        if !refingerprinted.contains(&id) {
            refingerprinted.insert(0, id);
        }
        *self = next;
        tracing::debug!("Restored {} with {} edge(s)", id, edges.len());

        Ok(ChangeRecord {
            change: Change::NodeRestored {
                node: id,
                edges: edges.iter().map(|e| e.id).collect(),
            },
            inverse: EditOp::RemoveNode(id),
            refingerprinted,
        })
    }

    /// Connection checks, in order: nodes, sockets, types, arity, cycles.
    fn check_connect(
        &self,
        source: NodeId,
        source_socket: &str,
        target: NodeId,
        target_socket: &str,
    ) -> GraphResult<()> {
        let src = self.node(source).ok_or(GraphError::UnknownNode(source))?;
        let dst = self.node(target).ok_or(GraphError::UnknownNode(target))?;

        let output = src.kind.descriptor().output(source_socket).ok_or_else(|| {
            GraphError::UnknownSocket {
                node: source,
                socket: source_socket.to_string(),
                direction: "output",
            }
        })?;
        let (_, input) = dst.kind.descriptor().input(target_socket).ok_or_else(|| {
            GraphError::UnknownSocket {
                node: target,
                socket: target_socket.to_string(),
                direction: "input",
            }
        })?;

        if output.ty != input.ty {
            return Err(GraphError::TypeMismatch {
                node: target,
                socket: target_socket.to_string(),
                source_type: output.ty,
                target_type: input.ty,
            });
        }
        if input.arity == Arity::Single
            && self
                .edges()
                .any(|e| e.target == target && e.target_socket == target_socket)
        {
            return Err(GraphError::SocketArity {
                node: target,
                socket: target_socket.to_string(),
            });
        }
        if source == target || self.reaches(target, source) {
            return Err(GraphError::Cycle {
                source_node: source,
                target_node: target,
            });
        }
        Ok(())
    }

    fn apply_connect(
        &mut self,
        id: Option<EdgeId>,
        source: NodeId,
        source_socket: String,
        target: NodeId,
        target_socket: String,
    ) -> GraphResult<ChangeRecord> {
        if let Err(e) = self.check_connect(source, &source_socket, target, &target_socket) {
            tracing::warn!("Rejected connection {} -> {}: {}", source, target, e);
            return Err(e);
        }
        let id = match id {
            Some(id) => {
                Self::check_explicit_id(id.0)?;
                if self.edge(id).is_some() {
                    return Err(GraphError::EdgeIdInUse(id));
                }
                id
            }
            None => EdgeId(self.edges.len() as u32),
        };
        self.insert_edge(Edge {
            id,
            source,
            source_socket,
            target,
            target_socket,
        });
        let refingerprinted = self.refresh(&[target]);
        tracing::debug!("Connected {} -> {} as {}", source, target, id);

        Ok(ChangeRecord {
            change: Change::EdgeAdded(id),
            inverse: EditOp::Disconnect(id),
            refingerprinted,
        })
    }

    fn apply_disconnect(&mut self, id: EdgeId) -> GraphResult<ChangeRecord> {
        let edge = self.edge(id).cloned().ok_or(GraphError::UnknownEdge(id))?;
        self.edges[id.index()] = None;
        let refingerprinted = self.refresh(&[edge.target]);

        Ok(ChangeRecord {
            change: Change::EdgeRemoved(id),
            inverse: EditOp::Connect {
                id: Some(id),
                source: edge.source,
                source_socket: edge.source_socket,
                target: edge.target,
                target_socket: edge.target_socket,
            },
            refingerprinted,
        })
    }

    fn apply_replace(&mut self, id: NodeId, params: Params) -> GraphResult<ChangeRecord> {
        let node = self.node_mut(id)?;
        let old = std::mem::replace(&mut node.params, params);
        let refingerprinted = self.refresh(&[id]);

        Ok(ChangeRecord {
            change: Change::ParametersChanged(id),
            inverse: EditOp::ReplaceParameters {
                node: id,
                params: old,
            },
            refingerprinted,
        })
    }

    // ==================== Fingerprints ====================

    fn compute_fingerprint(&self, id: NodeId) -> Fingerprint {
        let Some(node) = self.node(id) else {
            return Fingerprint::ZERO;
        };
        let incoming = self.incoming(id);
        let upstream: Vec<UpstreamInput<'_>> = incoming
            .iter()
            .map(|e| UpstreamInput {
                target_socket: &e.target_socket,
                source_socket: &e.source_socket,
                fingerprint: self.fingerprint(e.source).unwrap_or(Fingerprint::ZERO),
            })
            .collect();
        self.fingerprinter.node(node.kind, &node.params, &upstream)
    }

    /// Recompute the fingerprints of `roots` and everything downstream.
    /// Returns the nodes whose fingerprint changed, in topological order.
    fn refresh(&mut self, roots: &[NodeId]) -> Vec<NodeId> {
        let dirty = DependencyResolver::dirty_set(self, roots);
        if dirty.is_empty() {
            return Vec::new();
        }
        let order = match DependencyResolver::topological_order(self) {
            Ok(order) => order,
            Err(e) => {
                tracing::error!("Fingerprint refresh on an invalid graph: {}", e);
                return Vec::new();
            }
        };

        let mut changed = Vec::new();
        for id in order.into_iter().filter(|id| dirty.contains(id)) {
            let fingerprint = self.compute_fingerprint(id);
            if let Some(node) = self.nodes.get_mut(id.index()).and_then(Option::as_mut) {
                if node.fingerprint != fingerprint {
                    tracing::trace!("{} fingerprint -> {}", id, fingerprint.short());
                    node.fingerprint = fingerprint;
                    changed.push(id);
                }
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::param::ParamValue;
    use crate::pipeline::port::SocketType;

    fn params(pairs: &[(&str, ParamValue)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn csv(graph: &mut PipelineGraph) -> NodeId {
        graph
            .add_node(NodeKind::SourceCsv, params(&[("path", "a.csv".into())]))
            .unwrap()
    }

    fn first(graph: &mut PipelineGraph) -> NodeId {
        graph.add_node(NodeKind::RowsFirst, Params::new()).unwrap()
    }

    #[test]
    fn test_add_fills_defaults() {
        let mut graph = PipelineGraph::default();
        let id = csv(&mut graph);
        let node = graph.node(id).unwrap();
        assert_eq!(node.params.get("delimiter"), Some(&ParamValue::Text(",".into())));
        assert_eq!(node.params.get("has_header"), Some(&ParamValue::Bool(true)));
        assert_eq!(id, NodeId(0));
        assert_eq!(graph.next_node_id(), NodeId(1));
    }

    #[test]
    fn test_add_rejects_bad_parameter() {
        let mut graph = PipelineGraph::default();
        let err = graph
            .add_node(NodeKind::RowsFirst, params(&[("count", (-1i64).into())]))
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidParameter { ref name, .. } if name == "count"));
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.generation(), 0);
    }

    #[test]
    fn test_connect_validation_order() {
        let mut graph = PipelineGraph::default();
        let a = csv(&mut graph);
        let b = first(&mut graph);
        let k = graph.add_node(NodeKind::ConstantInteger, Params::new()).unwrap();

        assert_eq!(
            graph.connect(a, "table", NodeId(99), "table"),
            Err(GraphError::UnknownNode(NodeId(99)))
        );
        assert!(matches!(
            graph.connect(a, "nope", b, "table"),
            Err(GraphError::UnknownSocket { direction: "output", .. })
        ));
        assert_eq!(
            graph.connect(a, "table", b, "count"),
            Err(GraphError::TypeMismatch {
                node: b,
                socket: "count".into(),
                source_type: SocketType::DataFrame,
                target_type: SocketType::Scalar,
            })
        );
        graph.connect(a, "table", b, "table").unwrap();
        graph.connect(k, "value", b, "count").unwrap();
        assert!(matches!(
            graph.connect(a, "table", b, "table"),
            Err(GraphError::SocketArity { .. })
        ));
    }

    #[test]
    fn test_cycles_rejected() {
        let mut graph = PipelineGraph::default();
        let a = first(&mut graph);
        let b = first(&mut graph);
        let c = graph.add_node(NodeKind::Union, Params::new()).unwrap();
        graph.connect(a, "table", b, "table").unwrap();
        graph.connect(b, "table", c, "tables").unwrap();

        let before = graph.generation();
        assert_eq!(
            graph.connect(c, "table", a, "table"),
            Err(GraphError::Cycle {
                source_node: c,
                target_node: a
            })
        );
        assert!(matches!(
            graph.connect(c, "table", c, "tables"),
            Err(GraphError::Cycle { .. })
        ));
        assert_eq!(graph.generation(), before);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_fingerprints_propagate_downstream() {
        let mut graph = PipelineGraph::default();
        let a = csv(&mut graph);
        let b = first(&mut graph);
        let c = graph.add_node(NodeKind::SinkViewer, Params::new()).unwrap();
        graph.connect(a, "table", b, "table").unwrap();
        graph.connect(b, "table", c, "table").unwrap();

        let before_c = graph.fingerprint(c).unwrap();
        let record = graph
            .set_parameters(a, params(&[("path", "b.csv".into())]))
            .unwrap();
        assert_eq!(record.refingerprinted, vec![a, b, c]);
        assert_ne!(graph.fingerprint(c).unwrap(), before_c);

        // Position is not part of the fingerprint.
        let record = graph.move_node(b, Position::new(10.0, 5.0)).unwrap();
        assert!(record.refingerprinted.is_empty());
    }

    #[test]
    fn test_same_content_same_fingerprint() {
        let mut graph = PipelineGraph::default();
        let a = csv(&mut graph);
        let b = csv(&mut graph);
        assert_eq!(graph.fingerprint(a), graph.fingerprint(b));

        let explicit_default = graph
            .add_node(
                NodeKind::SourceCsv,
                params(&[("path", "a.csv".into()), ("delimiter", ",".into())]),
            )
            .unwrap();
        assert_eq!(graph.fingerprint(a), graph.fingerprint(explicit_default));
    }

    #[test]
    fn test_multi_input_order_matters() {
        let mut graph = PipelineGraph::default();
        let a = csv(&mut graph);
        let b = graph
            .add_node(NodeKind::SourceCsv, params(&[("path", "b.csv".into())]))
            .unwrap();
        let u1 = graph.add_node(NodeKind::Union, Params::new()).unwrap();
        let u2 = graph.add_node(NodeKind::Union, Params::new()).unwrap();
        graph.connect(a, "table", u1, "tables").unwrap();
        graph.connect(b, "table", u1, "tables").unwrap();
        graph.connect(b, "table", u2, "tables").unwrap();
        graph.connect(a, "table", u2, "tables").unwrap();
        assert_ne!(graph.fingerprint(u1), graph.fingerprint(u2));

        let sources: Vec<NodeId> = graph.incoming(u2).iter().map(|e| e.source).collect();
        assert_eq!(sources, vec![b, a]);
    }

    #[test]
    fn test_remove_and_restore_round_trip() {
        let mut graph = PipelineGraph::default();
        let a = csv(&mut graph);
        let b = first(&mut graph);
        let c = graph.add_node(NodeKind::SinkViewer, Params::new()).unwrap();
        graph.connect(a, "table", b, "table").unwrap();
        graph.connect(b, "table", c, "table").unwrap();
        let fp_c = graph.fingerprint(c);

        let record = graph.remove_node(b).unwrap();
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(record.refingerprinted, vec![c]);
        assert_ne!(graph.fingerprint(c), fp_c);

        let restored = graph.apply(record.inverse).unwrap();
        assert_eq!(restored.inverse, EditOp::RemoveNode(b));
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.fingerprint(c), fp_c);

        // Ids are never reused.
        let d = first(&mut graph);
        assert_eq!(d, NodeId(3));
    }

    #[test]
    fn test_inverse_of_disconnect_keeps_edge_id() {
        let mut graph = PipelineGraph::default();
        let a = csv(&mut graph);
        let b = first(&mut graph);
        let e = graph.connect(a, "table", b, "table").unwrap();
        let record = graph.disconnect(e).unwrap();
        graph.apply(record.inverse).unwrap();
        assert_eq!(graph.edge(e).map(|edge| edge.target), Some(b));
    }

    #[test]
    fn test_set_parameters_inverse_restores_exact_map() {
        let mut graph = PipelineGraph::default();
        let a = first(&mut graph);
        let before = graph.node(a).unwrap().params.clone();
        let record = graph
            .set_parameters(a, params(&[("count", 3i64.into())]))
            .unwrap();
        graph.apply(record.inverse).unwrap();
        assert_eq!(graph.node(a).unwrap().params, before);
    }

    #[test]
    fn test_explicit_ids() {
        let mut graph = PipelineGraph::default();
        let op = |id| EditOp::AddNode {
            id: Some(NodeId(id)),
            kind: NodeKind::Union,
            params: Params::new(),
            position: Position::default(),
        };
        graph.apply(op(5)).unwrap();
        assert_eq!(graph.apply(op(5)), Err(GraphError::NodeIdInUse(NodeId(5))));
        assert_eq!(
            graph.apply(op(u32::MAX)),
            Err(GraphError::IdOutOfRange(u32::MAX))
        );
        assert_eq!(graph.next_node_id(), NodeId(6));
    }
}
