//! Dependency resolution over the pipeline graph.
//!
//! ```text
//!      [csv] ──► [filter] ──► [aggregate] ──► [viewer]
//!        │
//!        └─────► [top_k]
//!
//! dirty_set({filter})       = {filter, aggregate, viewer}
//! ancestors(aggregate)      = {csv, filter, aggregate}
//! minimal_work({csv}, aggr) = {csv, filter, aggregate}
//! ```

use super::cache::ResultCache;
use super::compiled_plan::{ExecutionPlan, PlanStats, PlanStep};
use super::error::{GraphError, GraphResult};
use super::graph::PipelineGraph;
use super::id::NodeId;
use std::collections::{BTreeMap, BTreeSet};

/// Computes orders and node sets over a graph.
pub struct DependencyResolver;

impl DependencyResolver {
    /// Topological order of every live node using Kahn's algorithm.
    ///
    /// Ready nodes are taken in id order, which is insertion order, so the
    /// result is deterministic. Fails with `Cycle` if nodes remain.
    pub fn topological_order(graph: &PipelineGraph) -> GraphResult<Vec<NodeId>> {
        let mut in_degree: BTreeMap<NodeId, usize> =
            graph.nodes().map(|n| (n.id, 0)).collect();
        for edge in graph.edges() {
            if let Some(d) = in_degree.get_mut(&edge.target) {
                *d += 1;
            }
        }

        let mut ready: BTreeSet<NodeId> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for edge in graph.outgoing(node) {
                if let Some(d) = in_degree.get_mut(&edge.target) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(edge.target);
                    }
                }
            }
        }

        if order.len() < in_degree.len() {
            let placed: BTreeSet<NodeId> = order.iter().copied().collect();
            let culprit = graph
                .edges()
                .find(|e| !placed.contains(&e.source) && !placed.contains(&e.target));
            return Err(match culprit {
                Some(edge) => GraphError::Cycle {
                    source_node: edge.source,
                    target_node: edge.target,
                },
                None => GraphError::Cycle {
                    source_node: NodeId::INVALID,
                    target_node: NodeId::INVALID,
                },
            });
        }
        Ok(order)
    }

    /// Forward transitive closure of `changed`, inclusive. Dead ids are ignored.
    pub fn dirty_set(graph: &PipelineGraph, changed: &[NodeId]) -> BTreeSet<NodeId> {
        let mut dirty = BTreeSet::new();
        let mut stack: Vec<NodeId> = changed
            .iter()
            .copied()
            .filter(|id| graph.contains_node(*id))
            .collect();
        while let Some(node) = stack.pop() {
            if dirty.insert(node) {
                stack.extend(graph.successors(node));
            }
        }
        dirty
    }

    /// Backward transitive closure of `target`, inclusive.
    pub fn ancestors(graph: &PipelineGraph, target: NodeId) -> GraphResult<BTreeSet<NodeId>> {
        if !graph.contains_node(target) {
            return Err(GraphError::UnknownNode(target));
        }
        let mut seen = BTreeSet::new();
        let mut stack = vec![target];
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend(graph.predecessors(node));
            }
        }
        Ok(seen)
    }

    /// Ancestors of `target` in topological order, annotated with cache state.
    pub fn plan(
        graph: &PipelineGraph,
        target: NodeId,
        cache: &ResultCache,
    ) -> GraphResult<ExecutionPlan> {
        let start_time = std::time::Instant::now();

        let ancestors = Self::ancestors(graph, target)?;
        let steps: Vec<PlanStep> = Self::topological_order(graph)?
            .into_iter()
            .filter(|id| ancestors.contains(id))
            .filter_map(|id| graph.node(id))
            .map(|node| PlanStep {
                node: node.id,
                kind: node.kind,
                fingerprint: node.fingerprint,
                cached: cache.is_reusable(&node.fingerprint),
            })
            .collect();

        let stats = PlanStats {
            total_nodes: graph.node_count(),
            planned_nodes: steps.len(),
            cached_nodes: steps.iter().filter(|s| s.cached).count(),
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };
        tracing::debug!(
            "Planned {} for {}: {} step(s), {} cached",
            target,
            graph.node(target).map(|n| n.kind.id()).unwrap_or("?"),
            stats.planned_nodes,
            stats.cached_nodes
        );

        Ok(ExecutionPlan {
            target,
            steps,
            stats,
        })
    }

    /// Nodes that must re-execute for `requested` after `changed` were edited:
    /// the dirty set restricted to the ancestors of `requested`.
    pub fn minimal_work(
        graph: &PipelineGraph,
        changed: &[NodeId],
        requested: NodeId,
    ) -> GraphResult<BTreeSet<NodeId>> {
        let ancestors = Self::ancestors(graph, requested)?;
        Ok(Self::dirty_set(graph, changed)
            .intersection(&ancestors)
            .copied()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::pipeline::node_type::NodeKind;
    use crate::pipeline::param::{ParamValue, Params};

    /// csv ─► filter ─► aggregate ─► viewer, csv ─► top_k
    fn diamondless() -> (PipelineGraph, [NodeId; 5]) {
        let mut graph = PipelineGraph::default();
        let mut p = Params::new();
        p.insert("path".into(), ParamValue::from("a.csv"));
        let csv = graph.add_node(NodeKind::SourceCsv, p).unwrap();
        let filter = graph.add_node(NodeKind::Filter, Params::new()).unwrap();
        let aggregate = graph.add_node(NodeKind::Aggregate, Params::new()).unwrap();
        let viewer = graph.add_node(NodeKind::SinkViewer, Params::new()).unwrap();
        let top = graph.add_node(NodeKind::RowsTopK, Params::new()).unwrap();
        graph.connect(csv, "table", filter, "table").unwrap();
        graph.connect(filter, "table", aggregate, "table").unwrap();
        graph.connect(aggregate, "table", viewer, "table").unwrap();
        graph.connect(csv, "table", top, "table").unwrap();
        (graph, [csv, filter, aggregate, viewer, top])
    }

    #[test]
    fn test_topological_order_ties_by_id() {
        let (graph, [csv, filter, aggregate, viewer, top]) = diamondless();
        let order = DependencyResolver::topological_order(&graph).unwrap();
        assert_eq!(order, vec![csv, filter, aggregate, viewer, top]);
    }

    #[test]
    fn test_dirty_set_and_ancestors() {
        let (graph, [csv, filter, aggregate, viewer, top]) = diamondless();
        let dirty = DependencyResolver::dirty_set(&graph, &[filter]);
        assert_eq!(dirty, [filter, aggregate, viewer].into_iter().collect());

        let ancestors = DependencyResolver::ancestors(&graph, aggregate).unwrap();
        assert_eq!(ancestors, [csv, filter, aggregate].into_iter().collect());

        let work = DependencyResolver::minimal_work(&graph, &[csv], aggregate).unwrap();
        assert_eq!(work, [csv, filter, aggregate].into_iter().collect());
        assert!(!work.contains(&top));

        assert_eq!(
            DependencyResolver::ancestors(&graph, NodeId(42)),
            Err(GraphError::UnknownNode(NodeId(42)))
        );
    }

    #[test]
    fn test_plan_is_restricted_to_ancestors() {
        let (graph, [csv, filter, aggregate, _viewer, top]) = diamondless();
        let cache = ResultCache::new(CacheConfig::default());
        let plan = DependencyResolver::plan(&graph, aggregate, &cache).unwrap();
        assert_eq!(plan.nodes().collect::<Vec<_>>(), vec![csv, filter, aggregate]);
        assert!(!plan.contains(top));
        assert_eq!(plan.stats.total_nodes, 5);
        assert_eq!(plan.stats.cached_nodes, 0);
        assert_eq!(plan.to_execute().count(), 3);
    }
}
