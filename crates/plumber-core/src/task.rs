//! Scheduler task table: tracks, per in-flight request, which graph nodes
//! have all their input pipes filled and are ready to run. Grounded on
//! *origin: include/sched/task.h* (`sched_task_*`).
//!
//! A request enters through the graph's input node and leaves through its
//! output node; those two boundary connections are modeled as reserved
//! pipe ids (`EXTERNAL_INPUT_PIPE` / `EXTERNAL_OUTPUT_PIPE`) rather than a
//! separate request-level type, so the same `input_pipe`/`output_pipe`
//! machinery that wires ordinary nodes together also handles the request's
//! edges of the graph.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{codes, CoreError, DomainError, DomainErrorKind, ErrorCategory};
use crate::graph::ServiceGraph;
use crate::ids::{NodeId, PipeId, RequestId};
use crate::pipe::PipeHandle;
use crate::rls::RequestLocalScope;

/// Reserved pipe id standing in for "the request's external input",
/// delivered once via `TaskTable::new_request`.
pub const EXTERNAL_INPUT_PIPE: PipeId = PipeId::new(u32::MAX);
/// Reserved pipe id standing in for "the request's external output",
/// produced once the output node's task calls `output_pipe`.
pub const EXTERNAL_OUTPUT_PIPE: PipeId = PipeId::new(u32::MAX - 1);

/// A task ready to run: every input pipe required by its node has been
/// delivered.
pub struct Task {
    pub request: RequestId,
    pub node: NodeId,
    pub scope: RequestLocalScope,
    pub inputs: HashMap<PipeId, PipeHandle>,
}

impl Task {
    pub fn input(&self, pipe: PipeId) -> Option<&PipeHandle> {
        self.inputs.get(&pipe)
    }
}

/// Test-only introspection of where a request sits, mirroring
/// `sched_task_request_status`'s "only used for testing" note in the
/// original.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Cancelled,
}

struct PendingTask {
    scope: RequestLocalScope,
    inputs: HashMap<PipeId, PipeHandle>,
    cancelled: HashSet<PipeId>,
}

enum Delivery {
    Data(PipeHandle),
    Cancelled,
}

/// Outcome of delivering one pipe to a node's pending task.
pub enum Delivered {
    /// Still waiting on other input pipes.
    Pending,
    /// Every required input arrived; the task is now enqueued and can be
    /// retrieved with `next_ready_task`.
    BecameReady,
    /// Every required input was cancelled with no data ever arriving; the
    /// task, and everything reachable downstream of it, is cancelled.
    Cancelled,
}

pub struct TaskTable {
    graph: std::sync::Arc<ServiceGraph>,
    pending: DashMap<(RequestId, NodeId), PendingTask>,
    ready: Mutex<VecDeque<Task>>,
    external_outputs: DashMap<RequestId, PipeHandle>,
    next_request: AtomicU64,
    statuses: DashMap<RequestId, RequestStatus>,
}

impl TaskTable {
    pub fn new(graph: std::sync::Arc<ServiceGraph>) -> Self {
        Self {
            graph,
            pending: DashMap::new(),
            ready: Mutex::new(VecDeque::new()),
            external_outputs: DashMap::new(),
            next_request: AtomicU64::new(0),
            statuses: DashMap::new(),
        }
    }

    fn required_inputs(&self, node: NodeId) -> usize {
        let base = self
            .graph
            .node(node)
            .map(|n| n.inputs.iter().map(|e| e.to_pipe).collect::<HashSet<_>>().len())
            .unwrap_or(0);
        let boundary = if Some(node) == self.graph.input_node() { 1 } else { 0 };
        base + boundary
    }

    fn set_status(&self, request: RequestId, status: RequestStatus) {
        self.statuses.insert(request, status);
    }

    /// Registers a new request arriving on the graph's input node, seeding
    /// it with the external input handle and pre-registering the external
    /// output handle (the request's root response stream) so the output
    /// node's exec can reach it via `peek_external_output` without waiting
    /// for a full trip through the graph. Returns the freshly assigned
    /// request id.
    pub fn new_request(
        &self,
        scope: RequestLocalScope,
        input: PipeHandle,
        output: PipeHandle,
    ) -> Result<RequestId, CoreError> {
        let input_node = self.graph.input_node().ok_or_else(|| {
            DomainError::new(
                DomainErrorKind::Graph,
                codes::GRAPH_NOT_FINALIZED,
                "service graph has no input node",
            )
            .into_core(ErrorCategory::NonRetryable)
        })?;
        let request = RequestId::new(self.next_request.fetch_add(1, Ordering::SeqCst));
        self.set_status(request, RequestStatus::Pending);
        self.external_outputs.insert(request, output);
        self.deliver(request, input_node, EXTERNAL_INPUT_PIPE, scope, Delivery::Data(input))?;
        Ok(request)
    }

    /// Reads the request's external output handle without consuming it, for
    /// the output node's exec to write into directly. `None` once the
    /// request has already been finalized via `take_external_output`, or if
    /// cancellation removed it first.
    pub fn peek_external_output(&self, request: RequestId) -> Option<PipeHandle> {
        self.external_outputs.get(&request).map(|v| *v)
    }

    /// Marks a request's terminal node as having finished, independent of
    /// whether it routed anything through `output_pipe`. The output node's
    /// exec may write directly into the handle from `peek_external_output`
    /// without ever producing a fresh pipe id.
    pub fn complete_request(&self, request: RequestId) {
        self.set_status(request, RequestStatus::Completed);
    }

    /// Notifies the table that `pipe` on `node`'s task for `request` now
    /// has a handle attached. Uses the request's already-recorded scope;
    /// panics only if called before `new_request` established one, which
    /// cannot happen through the public API.
    pub fn input_pipe(
        &self,
        request: RequestId,
        node: NodeId,
        pipe: PipeId,
        handle: PipeHandle,
    ) -> Result<Delivered, CoreError> {
        let scope = self.scope_for(request, node)?;
        self.deliver(request, node, pipe, scope, Delivery::Data(handle))
    }

    /// Notifies the table that an input pipe was cancelled rather than
    /// delivered. Does not by itself change whether the task is ready; a
    /// later `pipe_ready`/`input_pipe` call still drives promotion, as in
    /// the original.
    pub fn input_cancelled(
        &self,
        request: RequestId,
        node: NodeId,
        pipe: PipeId,
    ) -> Result<Delivered, CoreError> {
        let scope = self.scope_for(request, node)?;
        self.deliver(request, node, pipe, scope, Delivery::Cancelled)
    }

    /// Looks up the scope a request's nodes are sharing, without pulling a
    /// whole pending task off the ready queue. Used by `input_pipe`/
    /// `input_cancelled` internally, and by the scheduler's async-completion
    /// handler, which only ever has a bare `(request, node)` pair to work
    /// with (the `Task` that originally deferred the work is long gone).
    pub fn scope_for(&self, request: RequestId, node: NodeId) -> Result<RequestLocalScope, CoreError> {
        if let Some(existing) = self.pending.get(&(request, node)) {
            return Ok(existing.scope.clone());
        }
        // First pipe for this (request, node): inherit the scope from any
        // other pending/seen task of the same request, or start fresh if
        // this is genuinely the first node touched (the input node).
        for entry in self.pending.iter() {
            if entry.key().0 == request {
                return Ok(entry.value().scope.clone());
            }
        }
        Ok(RequestLocalScope::new())
    }

    fn deliver(
        &self,
        request: RequestId,
        node: NodeId,
        pipe: PipeId,
        scope: RequestLocalScope,
        delivery: Delivery,
    ) -> Result<Delivered, CoreError> {
        let required = self.required_inputs(node);
        let mut entry = self
            .pending
            .entry((request, node))
            .or_insert_with(|| PendingTask {
                scope,
                inputs: HashMap::new(),
                cancelled: HashSet::new(),
            });
        match delivery {
            Delivery::Data(handle) => {
                entry.inputs.insert(pipe, handle);
            }
            Delivery::Cancelled => {
                entry.cancelled.insert(pipe);
            }
        }
        let have = entry.inputs.len() + entry.cancelled.len();
        if have < required {
            return Ok(Delivered::Pending);
        }
        drop(entry);
        let (_, pending) = self.pending.remove(&(request, node)).expect("entry just inserted");

        if pending.inputs.is_empty() {
            self.cancel_downstream(request, node)?;
            self.set_status(request, RequestStatus::Cancelled);
            if Some(node) == self.graph.output_node() {
                // The cascade just reached the request's own exit: nothing
                // downstream of it remains to commit an entry into, so
                // anything this request's nodes staged but never committed
                // can be reclaimed now instead of waiting on scope drop.
                pending.scope.dispose_uncommitted();
            }
            return Ok(Delivered::Cancelled);
        }

        let task = Task {
            request,
            node,
            scope: pending.scope,
            inputs: pending.inputs,
        };
        self.ready.lock().push_back(task);
        self.set_status(request, RequestStatus::Ready);
        Ok(Delivered::BecameReady)
    }

    /// Cancels every downstream edge of `node`, recursively, as the
    /// original's `sched_task_input_cancelled` specifies. Deliberately
    /// leaves `external_outputs` alone even when `node` is the output
    /// node: the scheduler retrieves it through `take_external_output` once
    /// it observes the cancellation, so it can still `deallocate` the real
    /// handle instead of it being dropped here with no chance to purge it.
    fn cancel_downstream(&self, request: RequestId, node: NodeId) -> Result<(), CoreError> {
        let outputs = self
            .graph
            .node(node)
            .map(|n| n.outputs.clone())
            .unwrap_or_default();
        for edge in outputs {
            self.deliver(
                request,
                edge.to,
                edge.to_pipe,
                RequestLocalScope::new(),
                Delivery::Cancelled,
            )?;
        }
        Ok(())
    }

    /// Dequeues the next task ready to run, if any.
    pub fn next_ready_task(&self) -> Option<Task> {
        let task = self.ready.lock().pop_front();
        if let Some(t) = &task {
            self.set_status(t.request, RequestStatus::Running);
        }
        task
    }

    /// Readiness notification hook: informational only, does not mutate
    /// table state (mirrors the original's "this does not change the ready
    /// state" note). Kept as a call site for the observability logger.
    pub fn pipe_ready(&self, _request: RequestId, _node: NodeId) {}

    /// Routes a handle produced on `node`'s `pipe` output to whatever the
    /// graph wires it to: the request's external output if `node` is the
    /// output node, the single downstream node/pipe if there is exactly one
    /// edge, or an error if the pipe fans out to more than one edge
    /// (callers must fork the handle and call `output_pipe_to` once per
    /// edge in that case). Takes `request`/`node` rather than `&Task` so a
    /// caller that no longer owns the `Task` object (the async task
    /// service's completion path, say, which only ever had `request`/`node`
    /// to begin with) can still route its output.
    pub fn output_pipe(
        &self,
        request: RequestId,
        node: NodeId,
        pipe: PipeId,
        handle: PipeHandle,
    ) -> Result<(), CoreError> {
        self.route_output(request, node, pipe, handle)
    }

    /// Same routing as `output_pipe`, for a forked copy of one of the
    /// node's own input pipes passed straight through unmodified. The
    /// precondition that `handle` was actually produced by forking an
    /// input (rather than freshly allocated) is enforced by the pipe
    /// runtime at allocation time, not re-checked here.
    pub fn output_shadow(
        &self,
        request: RequestId,
        node: NodeId,
        pipe: PipeId,
        handle: PipeHandle,
    ) -> Result<(), CoreError> {
        self.route_output(request, node, pipe, handle)
    }

    fn route_output(
        &self,
        request: RequestId,
        from_node: NodeId,
        from_pipe: PipeId,
        handle: PipeHandle,
    ) -> Result<(), CoreError> {
        if Some(from_node) == self.graph.output_node() && from_pipe == EXTERNAL_OUTPUT_PIPE {
            self.external_outputs.insert(request, handle);
            self.set_status(request, RequestStatus::Completed);
            return Ok(());
        }

        let edges: Vec<_> = self
            .graph
            .node(from_node)
            .map(|n| {
                n.outputs
                    .iter()
                    .copied()
                    .filter(|e| e.from_pipe == from_pipe)
                    .collect()
            })
            .unwrap_or_default();

        match edges.len() {
            0 => Ok(()),
            1 => {
                let edge = edges[0];
                self.input_pipe(request, edge.to, edge.to_pipe, handle).map(|_| ())
            }
            _ => Err(DomainError::new(
                DomainErrorKind::Scheduler,
                codes::SCHEDULER_FAN_OUT_REQUIRES_SHADOW,
                "output pipe fans out to multiple edges; fork the handle and route each edge separately",
            )
            .into_core(ErrorCategory::NonRetryable)),
        }
    }

    /// Removes and returns the external output handle for a completed
    /// request, if one was produced.
    pub fn take_external_output(&self, request: RequestId) -> Option<PipeHandle> {
        self.external_outputs.remove(&request).map(|(_, v)| v)
    }

    /// Routes `handle` to one specific edge leaving `(node, pipe)`, matched
    /// by destination rather than rediscovered by `from_pipe` alone. Needed
    /// for fan-out: when a single output pd feeds more than one edge,
    /// `output_pipe`/`output_shadow` cannot tell which edge a caller means
    /// (both see the same ambiguous edge set), so the scheduler calls this
    /// once per edge instead, forking the handle for every edge but the
    /// last. Takes `request`/`node` rather than `&Task` for the same reason
    /// as `output_pipe`.
    pub fn output_pipe_to(
        &self,
        request: RequestId,
        node: NodeId,
        pipe: PipeId,
        to_node: NodeId,
        to_pipe: PipeId,
        handle: PipeHandle,
    ) -> Result<Delivered, CoreError> {
        let exists = self
            .graph
            .node(node)
            .map(|n| {
                n.outputs
                    .iter()
                    .any(|e| e.from_pipe == pipe && e.to == to_node && e.to_pipe == to_pipe)
            })
            .unwrap_or(false);
        if !exists {
            return Err(DomainError::new(
                DomainErrorKind::Scheduler,
                codes::GRAPH_DANGLING_EDGE,
                "no such edge leaving this output pipe",
            )
            .into_core(ErrorCategory::NonRetryable));
        }
        self.input_pipe(request, to_node, to_pipe, handle)
    }

    /// Marks a launched task disposed. Resource cleanup itself happens
    /// through ordinary `Drop` once the last owner of the task (and its
    /// scope) goes out of scope; this only updates status for
    /// introspection. Never downgrades a request that some other node's
    /// cascade already marked `Cancelled` back to `Completed` — cancellation
    /// is terminal even when the node whose task this was ran to its own
    /// completion.
    pub fn free(&self, task: Task) {
        self.statuses
            .entry(task.request)
            .and_modify(|status| {
                if *status != RequestStatus::Cancelled {
                    *status = RequestStatus::Completed;
                }
            })
            .or_insert(RequestStatus::Completed);
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn request_status(&self, request: RequestId) -> Option<RequestStatus> {
        self.statuses.get(&request).map(|v| *v)
    }
}
