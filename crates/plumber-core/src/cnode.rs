//! Critical-node analyzer: precomputes, for every node in a finalized
//! `ServiceGraph`, whether cancelling it is guaranteed to cancel at least
//! one other node, and if so the full set ("cluster") of nodes that become
//! unreachable.
//!
//! Grounded directly on *origin: include/sched/cnode.h*'s proof: node A is
//! critical iff there exists an edge `(A, B)` with `in_degree(B) == 1`.
//! That condition is checked once per node here; the cluster for a
//! critical node is then the full unreachable set computed by comparing
//! "nodes reachable from the graph's sources" against "nodes reachable
//! with A removed" (implemented as two DFS passes whose visited-sets are
//! XOR'd, exactly as the header's proof constructs C(A)).

use std::collections::HashSet;

use crate::error::{codes, CoreError, DomainError, DomainErrorKind, ErrorCategory};
use crate::graph::ServiceGraph;
use crate::ids::{NodeId, PipeId};

/// One edge crossing out of a critical cluster's boundary: where the
/// cluster's cancellation cascade must stop and instead hand control back
/// to a node with another live input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClusterBoundaryEdge {
    pub node: NodeId,
    pub pipe: PipeId,
}

/// The critical-node information for one node: if critical, the cluster of
/// nodes that become unreachable when this node is removed, plus whether
/// the service graph's own output is inside that cluster.
#[derive(Clone, Debug, Default)]
pub struct ClusterInfo {
    pub cluster: HashSet<NodeId>,
    pub boundary: Vec<ClusterBoundaryEdge>,
    pub output_cancelled: bool,
}

/// Precomputed critical-node information for an entire service graph.
pub struct CriticalNodeInfo {
    clusters: Vec<Option<ClusterInfo>>,
}

impl CriticalNodeInfo {
    /// A placeholder with no nodes, used while a `ServiceGraph` is still
    /// under construction inside `finalize`, before `analyze` has run.
    pub(crate) fn empty() -> Self {
        Self { clusters: Vec::new() }
    }

    /// `None` for a non-critical node; `Some` for a critical one, carrying
    /// its cluster and boundary.
    pub fn boundary(&self, node: NodeId) -> Result<Option<&ClusterInfo>, CoreError> {
        self.clusters
            .get(node.raw() as usize)
            .map(|opt| opt.as_ref())
            .ok_or_else(|| {
                DomainError::new(
                    DomainErrorKind::CriticalNode,
                    codes::CNODE_UNKNOWN_NODE,
                    format!("no such node: {node:?}"),
                )
                .into_core(ErrorCategory::NonRetryable)
            })
    }

    pub fn is_critical(&self, node: NodeId) -> bool {
        matches!(self.boundary(node), Ok(Some(_)))
    }
}

/// Computes `CriticalNodeInfo` for `graph`.
pub fn analyze(graph: &ServiceGraph) -> CriticalNodeInfo {
    let n = graph.num_nodes();
    let all_reachable = reachable_from_all(graph, n);

    let mut clusters = vec![None; n];
    for (id, node) in graph.nodes() {
        let is_critical = node
            .outputs
            .iter()
            .any(|edge| graph.in_degree(edge.to) == 1);
        if !is_critical {
            continue;
        }

        let reachable_without = reachable_excluding(graph, n, id);
        let unreachable: HashSet<NodeId> = all_reachable
            .difference(&reachable_without)
            .copied()
            .filter(|&candidate| candidate != id)
            .collect();

        let output_cancelled = graph
            .output_node()
            .map(|out| unreachable.contains(&out) || out == id)
            .unwrap_or(false);

        let boundary = node
            .outputs
            .iter()
            .filter(|edge| !unreachable.contains(&edge.to))
            .map(|edge| ClusterBoundaryEdge {
                node: edge.to,
                pipe: edge.to_pipe,
            })
            .collect();

        clusters[id.raw() as usize] = Some(ClusterInfo {
            cluster: unreachable,
            boundary,
            output_cancelled,
        });
    }

    CriticalNodeInfo { clusters }
}

fn reachable_from_all(graph: &ServiceGraph, n: usize) -> HashSet<NodeId> {
    let mut visited = HashSet::with_capacity(n);
    for (id, node) in graph.nodes() {
        if node.inputs.is_empty() {
            dfs(graph, id, &mut visited, None);
        }
    }
    visited
}

fn reachable_excluding(graph: &ServiceGraph, n: usize, excluded: NodeId) -> HashSet<NodeId> {
    let mut visited = HashSet::with_capacity(n);
    for (id, node) in graph.nodes() {
        if node.inputs.is_empty() && id != excluded {
            dfs(graph, id, &mut visited, Some(excluded));
        }
    }
    visited
}

fn dfs(graph: &ServiceGraph, start: NodeId, visited: &mut HashSet<NodeId>, excluded: Option<NodeId>) {
    if Some(start) == excluded || !visited.insert(start) {
        return;
    }
    if let Some(node) = graph.node(start) {
        for edge in &node.outputs {
            dfs(graph, edge.to, visited, excluded);
        }
    }
}
