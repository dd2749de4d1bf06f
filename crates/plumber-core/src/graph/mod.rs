//! Service graph: the finalized, immutable DAG of servlet nodes wired
//! together by typed pipes, built once by `GraphBuilder` before any
//! request is scheduled (spec.md §4.4).

mod builder;

pub use builder::GraphBuilder;

use std::sync::Arc;

use crate::cnode::CriticalNodeInfo;
use crate::ids::{NodeId, PipeId, ServletId};
use crate::pdt::Pdt;

/// One edge in the graph: an output pipe on one node feeding an input pipe
/// on another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub from: NodeId,
    pub from_pipe: PipeId,
    pub to: NodeId,
    pub to_pipe: PipeId,
}

/// One node in the graph: a servlet instance plus its incident edges. The
/// `pdt` is the servlet's pipe descriptor table as loaded from STAB at the
/// time the node was added; a node built without one (the common case in
/// topology-only tests that never touch STAB) carries an empty `Pdt`, which
/// exempts it from `finalize`'s per-PD structural and type checks.
#[derive(Clone, Debug)]
pub struct Node {
    pub servlet: ServletId,
    pub inputs: Vec<Edge>,
    pub outputs: Vec<Edge>,
    pub pdt: Pdt,
}

/// The finalized service graph. Immutable: once built, a `ServiceGraph`
/// never gains or loses nodes/edges, so it can be shared across worker
/// threads behind an `Arc` without synchronization.
pub struct ServiceGraph {
    nodes: Vec<Node>,
    input_node: Option<NodeId>,
    output_node: Option<NodeId>,
    cnode: Arc<CriticalNodeInfo>,
}

impl ServiceGraph {
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Critical-node info computed once, at `finalize` time (spec.md §4.4),
    /// from the graph's own final edge set.
    pub fn critical_node_info(&self) -> Arc<CriticalNodeInfo> {
        self.cnode.clone()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.raw() as usize)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId::new(i as u32), n))
    }

    pub fn input_node(&self) -> Option<NodeId> {
        self.input_node
    }

    pub fn output_node(&self) -> Option<NodeId> {
        self.output_node
    }

    /// In-degree of a node: how many edges point at it. Used directly by
    /// the critical-node analyzer's defining condition (exists edge A→B
    /// with `in_degree(B) == 1`).
    pub fn in_degree(&self, id: NodeId) -> usize {
        self.node(id).map(|n| n.inputs.len()).unwrap_or(0)
    }
}
