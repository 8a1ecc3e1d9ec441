//! Identity types for the pipeline system.
//!
//! Node and edge ids are newtypes over `u32` that double as indices into the
//! graph's slot vectors, providing O(1) lookup. Ids are allocated
//! monotonically and never reused within a graph, so they are stable across
//! edits, undo/redo and persistence.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index into `PipelineGraph::nodes`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const INVALID: NodeId = NodeId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "NodeId(INVALID)")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Index into `PipelineGraph::edges`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub u32);

impl EdgeId {
    pub const INVALID: EdgeId = EdgeId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "EdgeId(INVALID)")
        } else {
            write!(f, "EdgeId({})", self.0)
        }
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identifies one evaluation started by the scheduler, for cancellation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default)]
pub struct EvaluationId(pub u64);

impl fmt::Display for EvaluationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eval#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id() {
        let id = NodeId(42);
        assert!(id.is_valid());
        assert_eq!(id.index(), 42);
        assert!(!NodeId::INVALID.is_valid());
        assert_eq!(format!("{:?}", id), "NodeId(42)");
        assert_eq!(format!("{:?}", NodeId::INVALID), "NodeId(INVALID)");
    }

    #[test]
    fn test_edge_id() {
        let id = EdgeId(7);
        assert!(id.is_valid());
        assert_eq!(id.index(), 7);
        assert!(EdgeId(1) < EdgeId(2));
        assert_eq!(format!("{}", id), "EdgeId(7)");
    }

    #[test]
    fn test_ids_serialize_as_numbers() {
        assert_eq!(serde_json::to_string(&NodeId(3)).unwrap(), "3");
        let id: EdgeId = serde_json::from_str("9").unwrap();
        assert_eq!(id, EdgeId(9));
    }

    #[test]
    fn test_evaluation_id_display() {
        assert_eq!(EvaluationId(5).to_string(), "eval#5");
    }
}
