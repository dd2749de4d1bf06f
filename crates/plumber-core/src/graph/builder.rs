use crate::error::{codes, CoreError, DomainError, DomainErrorKind, ErrorCategory};
use crate::ids::{NodeId, PipeId, ServletId};
use crate::pdt::{Pdt, PipeFlags};
use crate::type_resolver::{Binding, TypeResolver};

use super::{Edge, Node, ServiceGraph};

/// Builds a `ServiceGraph` incrementally: add nodes, wire edges between
/// them, mark the request's input/output node, then `finalize` once. Mirrors
/// the original service-script interpreter's construction order without
/// committing this crate to a script language (out of scope per spec.md §1).
pub struct GraphBuilder {
    nodes: Vec<(ServletId, Vec<Edge>, Vec<Edge>, Pdt)>,
    input_node: Option<NodeId>,
    output_node: Option<NodeId>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            input_node: None,
            output_node: None,
        }
    }

    pub fn add_node(&mut self, servlet: ServletId) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push((servlet, Vec::new(), Vec::new(), Pdt::new()));
        id
    }

    /// Attaches `pdt` (as loaded from STAB for this node's servlet) so
    /// `finalize` can validate the node's pipe descriptors and feed them to
    /// the type resolver. A node left without one is exempt from those
    /// per-PD checks — only the topology-level invariants (acyclic,
    /// reachable, has a downstream edge) still apply to it.
    pub fn set_pdt(&mut self, node: NodeId, pdt: Pdt) -> Result<(), CoreError> {
        self.check_node(node)?;
        self.nodes[node.raw() as usize].3 = pdt;
        Ok(())
    }

    pub fn set_input(&mut self, node: NodeId) {
        self.input_node = Some(node);
    }

    pub fn set_output(&mut self, node: NodeId) {
        self.output_node = Some(node);
    }

    fn check_node(&self, id: NodeId) -> Result<(), CoreError> {
        if (id.raw() as usize) < self.nodes.len() {
            Ok(())
        } else {
            Err(DomainError::new(
                DomainErrorKind::Graph,
                codes::GRAPH_DANGLING_EDGE,
                format!("edge references unknown node {id:?}"),
            )
            .into_core(ErrorCategory::NonRetryable))
        }
    }

    /// Wires `from`'s `from_pipe` output to `to`'s `to_pipe` input.
    pub fn add_edge(
        &mut self,
        from: NodeId,
        from_pipe: PipeId,
        to: NodeId,
        to_pipe: PipeId,
    ) -> Result<(), CoreError> {
        self.check_node(from)?;
        self.check_node(to)?;
        let edge = Edge {
            from,
            from_pipe,
            to,
            to_pipe,
        };
        self.nodes[from.raw() as usize].2.push(edge);
        self.nodes[to.raw() as usize].1.push(edge);
        Ok(())
    }

    /// Consumes the builder, producing an immutable graph. Validates the
    /// structural invariants of spec.md §3 (acyclic, input-reachable, every
    /// non-output node has a downstream edge, every input PD of every
    /// non-input node has an incoming edge), runs the type resolver over
    /// every edge whose endpoints carry a real `Pdt` (invoking any
    /// registered type hooks with the final type), and runs the
    /// critical-node analyzer, rejecting the graph if any step fails.
    pub fn finalize(self) -> Result<ServiceGraph, CoreError> {
        let input_node = self.input_node;
        let output_node = self.output_node;
        let nodes: Vec<Node> = self
            .nodes
            .into_iter()
            .map(|(servlet, inputs, outputs, pdt)| Node {
                servlet,
                inputs,
                outputs,
                pdt,
            })
            .collect();

        if has_cycle(&nodes) {
            return Err(DomainError::new(
                DomainErrorKind::Graph,
                codes::GRAPH_CYCLE_DETECTED,
                "service graph must be acyclic",
            )
            .into_core(ErrorCategory::NonRetryable));
        }

        check_reachability(&nodes, input_node)?;
        check_downstream_edges(&nodes, output_node)?;
        check_input_pd_coverage(&nodes, input_node)?;
        resolve_types(&nodes)?;

        // `cnode::analyze` only reads edges/in-degrees, both already final
        // at this point, so build the graph once and analyze it in place.
        let mut graph = ServiceGraph {
            nodes,
            input_node,
            output_node,
            cnode: std::sync::Arc::new(crate::cnode::CriticalNodeInfo::empty()),
        };
        graph.cnode = std::sync::Arc::new(crate::cnode::analyze(&graph));
        Ok(graph)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn has_cycle(nodes: &[Node]) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }
    let mut marks = vec![Mark::Unvisited; nodes.len()];

    fn visit(node: usize, nodes: &[Node], marks: &mut [Mark]) -> bool {
        match marks[node] {
            Mark::Done => return false,
            Mark::InProgress => return true,
            Mark::Unvisited => {}
        }
        marks[node] = Mark::InProgress;
        for edge in &nodes[node].outputs {
            if visit(edge.to.raw() as usize, nodes, marks) {
                return true;
            }
        }
        marks[node] = Mark::Done;
        false
    }

    for start in 0..nodes.len() {
        if marks[start] == Mark::Unvisited && visit(start, nodes, &mut marks) {
            return true;
        }
    }
    false
}

/// Every node must be reachable from the designated input node (spec.md
/// §3 / §8.2). Vacuous when no input node was ever designated (a bare
/// topology graph) — there is nothing to measure reachability from.
fn check_reachability(nodes: &[Node], input_node: Option<NodeId>) -> Result<(), CoreError> {
    let Some(input_node) = input_node else {
        return Ok(());
    };
    let mut visited = vec![false; nodes.len()];
    let mut stack: Vec<usize> = vec![input_node.raw() as usize];
    visited[input_node.raw() as usize] = true;
    while let Some(idx) = stack.pop() {
        for edge in &nodes[idx].outputs {
            let next = edge.to.raw() as usize;
            if !visited[next] {
                visited[next] = true;
                stack.push(next);
            }
        }
    }
    if let Some(idx) = visited.iter().position(|&seen| !seen) {
        return Err(DomainError::new(
            DomainErrorKind::Graph,
            codes::GRAPH_UNREACHABLE_NODE,
            format!("node {idx} is not reachable from any source node"),
        )
        .into_core(ErrorCategory::NonRetryable));
    }
    Ok(())
}

/// Every non-output node must have at least one downstream edge (spec.md
/// §3) — a dead end that is not the request's output node would otherwise
/// silently swallow whatever it produced. Vacuous when no output node was
/// ever designated (a bare topology graph), since the exemption itself is
/// meaningless without one.
fn check_downstream_edges(nodes: &[Node], output_node: Option<NodeId>) -> Result<(), CoreError> {
    let Some(output_node) = output_node else {
        return Ok(());
    };
    for (idx, node) in nodes.iter().enumerate() {
        if NodeId::new(idx as u32) == output_node {
            continue;
        }
        if node.outputs.is_empty() {
            return Err(DomainError::new(
                DomainErrorKind::Graph,
                codes::GRAPH_NO_DOWNSTREAM_EDGE,
                format!("node {idx} is not the output node but has no downstream edge"),
            )
            .into_core(ErrorCategory::NonRetryable));
        }
    }
    Ok(())
}

/// Every input PD of every non-input node must have an incoming edge
/// (spec.md §3 / §8.3). Nodes built without a real `Pdt` (size 0) have no
/// PDs to check and pass trivially.
fn check_input_pd_coverage(nodes: &[Node], input_node: Option<NodeId>) -> Result<(), CoreError> {
    for (idx, node) in nodes.iter().enumerate() {
        let id = NodeId::new(idx as u32);
        if Some(id) == input_node {
            continue;
        }
        for pd in node.pdt.iter() {
            if !node.pdt.flags(pd)?.contains(PipeFlags::INPUT) {
                continue;
            }
            let wired = node.inputs.iter().any(|edge| edge.to_pipe == pd);
            if !wired {
                return Err(DomainError::new(
                    DomainErrorKind::Graph,
                    codes::GRAPH_MISSING_INPUT_EDGE,
                    format!("node {idx}: input pd {pd:?} has no incoming edge"),
                )
                .into_core(ErrorCategory::NonRetryable));
            }
        }
    }
    Ok(())
}

/// Runs the type resolver over every edge whose endpoints both carry a real
/// `Pdt`, then invokes each resolved PD's registered type hook with its
/// final type, failing the whole resolution if a hook returns `None`
/// (spec.md §4.3: "hook failure fails the whole resolution").
fn resolve_types(nodes: &[Node]) -> Result<(), CoreError> {
    struct TypedEdge<'a> {
        from: NodeId,
        from_pipe: PipeId,
        to: NodeId,
        to_pipe: PipeId,
        output_expr: &'a str,
        input_expr: &'a str,
    }

    let mut typed_edges = Vec::new();
    for from_node in nodes {
        for edge in &from_node.outputs {
            let to_node = &nodes[edge.to.raw() as usize];
            if from_node.pdt.size() == 0 || to_node.pdt.size() == 0 {
                continue;
            }
            typed_edges.push(TypedEdge {
                from: edge.from,
                from_pipe: edge.from_pipe,
                to: edge.to,
                to_pipe: edge.to_pipe,
                output_expr: from_node.pdt.type_expr(edge.from_pipe)?,
                input_expr: to_node.pdt.type_expr(edge.to_pipe)?,
            });
        }
    }

    if typed_edges.is_empty() {
        return Ok(());
    }

    let bindings: Vec<Binding<'_>> = typed_edges
        .iter()
        .map(|e| Binding {
            output_expr: e.output_expr,
            input_expr: e.input_expr,
        })
        .collect();

    let mut resolver = TypeResolver::new();
    let resolved = resolver.resolve_fixpoint(&bindings)?;

    let mut final_type: std::collections::HashMap<(NodeId, PipeId), String> = std::collections::HashMap::new();
    for (edge, (out_resolved, in_resolved)) in typed_edges.iter().zip(resolved.into_iter()) {
        final_type.insert((edge.from, edge.from_pipe), out_resolved);
        final_type.insert((edge.to, edge.to_pipe), in_resolved);
    }

    for (idx, node) in nodes.iter().enumerate() {
        if node.pdt.size() == 0 {
            continue;
        }
        let node_id = NodeId::new(idx as u32);
        for pd in node.pdt.iter() {
            let Some(hook) = node.pdt.type_hook(pd)? else {
                continue;
            };
            let resolved = final_type
                .get(&(node_id, pd))
                .cloned()
                .or_else(|| resolver.resolve_expr(node.pdt.type_expr(pd).ok()?));
            let Some(resolved) = resolved else {
                continue;
            };
            if (*hook)(&resolved).is_none() {
                return Err(DomainError::new(
                    DomainErrorKind::TypeResolution,
                    codes::TYPE_HOOK_FAILED,
                    format!("node {idx}: type hook for pd {pd:?} rejected type {resolved}"),
                )
                .into_core(ErrorCategory::ProtocolViolation));
            }
        }
    }

    Ok(())
}
