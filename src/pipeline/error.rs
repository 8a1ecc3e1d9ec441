//! Pipeline-specific error types.
//!
//! [`GraphError`]s are returned synchronously by edits and leave the graph
//! untouched. [`ExecutionError`]s belong to a single node; they are stored in
//! cache entries and reported per node, so they are `Clone`.

use crate::pipeline::id::{EdgeId, EvaluationId, NodeId};
use crate::pipeline::port::SocketType;
use thiserror::Error;

/// Rejected graph edits.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Connecting {source_node} to {target_node} would create a cycle")]
    Cycle {
        source_node: NodeId,
        target_node: NodeId,
    },

    #[error("Input '{socket}' of {node} already has an incoming edge")]
    SocketArity { node: NodeId, socket: String },

    #[error("Cannot connect {source_type} output to {target_type} input '{socket}' of {node}")]
    TypeMismatch {
        node: NodeId,
        socket: String,
        source_type: SocketType,
        target_type: SocketType,
    },

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Unknown edge {0}")]
    UnknownEdge(EdgeId),

    #[error("{node} has no {direction} socket '{socket}'")]
    UnknownSocket {
        node: NodeId,
        socket: String,
        direction: &'static str,
    },

    #[error("Unknown node kind '{0}'")]
    UnknownKind(String),

    #[error("Invalid parameter '{name}' on {node}: {message}")]
    InvalidParameter {
        node: NodeId,
        name: String,
        message: String,
    },

    #[error("Node id {0} is already in use")]
    NodeIdInUse(NodeId),

    #[error("Edge id {0} is already in use")]
    EdgeIdInUse(EdgeId),

    #[error("Id {0} is out of range")]
    IdOutOfRange(u32),
}

/// Per-node execution failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("User code failed in {node}: {message}")]
    UserCodeFailure { node: NodeId, message: String },

    #[error("Engine failed in {node}: {message}")]
    EngineExecution { node: NodeId, message: String },

    #[error("Required input '{socket}' of {node} is not connected")]
    MissingInput { node: NodeId, socket: String },

    #[error("Invalid parameter '{name}' on {node}: {message}")]
    InvalidParameter {
        node: NodeId,
        name: String,
        message: String,
    },

    #[error("Cache entry for {node} belongs to a different node kind")]
    CacheCorruption { node: NodeId },

    #[error("{node} is blocked by the failure of {cause}")]
    Blocked { node: NodeId, cause: NodeId },

    #[error("Evaluation {0} was cancelled")]
    Cancelled(EvaluationId),

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl ExecutionError {
    /// The node the error is attributed to, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            ExecutionError::UserCodeFailure { node, .. }
            | ExecutionError::EngineExecution { node, .. }
            | ExecutionError::MissingInput { node, .. }
            | ExecutionError::InvalidParameter { node, .. }
            | ExecutionError::CacheCorruption { node }
            | ExecutionError::Blocked { node, .. } => Some(*node),
            ExecutionError::UnknownNode(node) => Some(*node),
            ExecutionError::Cancelled(_) | ExecutionError::Graph(_) => None,
        }
    }
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;
