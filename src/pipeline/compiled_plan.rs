use super::fingerprint::Fingerprint;
use super::id::NodeId;
use super::node_type::NodeKind;

/// One node of an execution plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub node: NodeId,
    pub kind: NodeKind,
    pub fingerprint: Fingerprint,
    /// A reusable cache entry existed when the plan was made
    pub cached: bool,
}

/// Ancestors of a target (inclusive) in topological order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub target: NodeId,

    /// Steps in topological order; the target is last
    pub steps: Vec<PlanStep>,

    /// Planning statistics
    pub stats: PlanStats,
}

/// Statistics about a plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Live nodes in the graph
    pub total_nodes: usize,

    /// Nodes in the plan
    pub planned_nodes: usize,

    /// Planned nodes with a reusable cache entry
    pub cached_nodes: usize,

    /// Planning time in microseconds
    pub compile_time_us: u64,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.steps.iter().any(|s| s.node == node)
    }

    /// Planned nodes in order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.steps.iter().map(|s| s.node)
    }

    /// Steps that will have to execute.
    pub fn to_execute(&self) -> impl Iterator<Item = &PlanStep> + '_ {
        self.steps.iter().filter(|s| !s.cached)
    }
}
