//! Persisted pipeline definitions (JSON).
//!
//! ```json
//! {
//!   "version": 1,
//!   "name": "orders",
//!   "saved_at": "2026-03-01T12:00:00Z",
//!   "nodes": [
//!     { "id": 0, "kind": "source.csv", "params": { "path": "orders.csv" }, "position": { "x": 0.0, "y": 0.0 } }
//!   ],
//!   "edges": [
//!     { "id": 0, "source": 0, "source_socket": "table", "target": 1, "target_socket": "table" }
//!   ]
//! }
//! ```
//!
//! Node and edge ids are kept, so a loaded graph is indistinguishable from
//! the saved one, fingerprints included. Edges are stored in id order, which
//! is also the order of multi-input sockets.

use super::error::GraphError;
use super::fingerprint::Fingerprinter;
use super::graph::{EditOp, PipelineGraph};
use super::id::{EdgeId, NodeId};
use super::node::Position;
use super::node_type::NodeKind;
use super::param::Params;
use crate::error::{Result, ResultExt, WittError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current definition format version.
pub const DEFINITION_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: NodeId,
    /// Stable kind id, e.g. `rows.first`.
    pub kind: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub id: EdgeId,
    pub source: NodeId,
    pub source_socket: String,
    pub target: NodeId,
    pub target_socket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub version: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

/// Equality ignores `saved_at`.
impl PartialEq for PipelineDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.name == other.name
            && self.nodes == other.nodes
            && self.edges == other.edges
    }
}

impl PipelineDefinition {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            version: DEFINITION_VERSION,
            name: name.into(),
            saved_at: None,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn from_graph(graph: &PipelineGraph, name: impl Into<String>) -> Self {
        Self {
            version: DEFINITION_VERSION,
            name: name.into(),
            saved_at: None,
            nodes: graph
                .nodes()
                .map(|n| NodeDefinition {
                    id: n.id,
                    kind: n.kind.id().to_string(),
                    params: n.params.clone(),
                    position: n.position,
                })
                .collect(),
            edges: graph
                .edges()
                .map(|e| EdgeDefinition {
                    id: e.id,
                    source: e.source,
                    source_socket: e.source_socket.clone(),
                    target: e.target,
                    target_socket: e.target_socket.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild the graph, validating every node and edge as an edit would.
    pub fn to_graph(&self, fingerprinter: Fingerprinter) -> Result<PipelineGraph> {
        if self.version > DEFINITION_VERSION {
            return Err(WittError::Definition(format!(
                "unsupported definition version {} (newest supported is {})",
                self.version, DEFINITION_VERSION
            )));
        }

        let mut graph = PipelineGraph::new(fingerprinter);
        for node in &self.nodes {
            let kind = NodeKind::from_id(&node.kind)
                .ok_or_else(|| GraphError::UnknownKind(node.kind.clone()))
                .with_context(|| format!("Invalid node {}", node.id))?;
            graph
                .apply(EditOp::AddNode {
                    id: Some(node.id),
                    kind,
                    params: node.params.clone(),
                    position: node.position,
                })
                .with_context(|| format!("Invalid node {}", node.id))?;
        }

        let mut edges: Vec<&EdgeDefinition> = self.edges.iter().collect();
        edges.sort_by_key(|e| e.id);
        for edge in edges {
            graph
                .apply(EditOp::Connect {
                    id: Some(edge.id),
                    source: edge.source,
                    source_socket: edge.source_socket.clone(),
                    target: edge.target,
                    target_socket: edge.target_socket.clone(),
                })
                .with_context(|| format!("Invalid edge {}", edge.id))?;
        }

        tracing::debug!(
            "Built graph '{}' with {} node(s) and {} edge(s)",
            self.name,
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| WittError::Definition(e.to_string()))
    }

    /// Write the definition, stamping `saved_at`.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.saved_at = Some(Utc::now());
        let json = self.to_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Saved pipeline '{}' to {:?}", self.name, path);
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let definition = Self::from_json(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        tracing::info!(
            "Loaded pipeline '{}' ({} nodes) from {:?}",
            definition.name,
            definition.nodes.len(),
            path
        );
        Ok(definition)
    }
}
