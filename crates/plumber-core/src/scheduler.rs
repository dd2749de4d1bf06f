//! Scheduler: the dispatcher/worker pair that turns queued IO and async
//! events into ready tasks and runs them. Grounded on spec.md §4.11's
//! six-step processing loop; the worker pool follows the same job-queue
//! pattern as `async_task::AsyncTaskService`, and the "invoke the servlet"
//! seam follows `stab::ServletLoader`'s convention of pushing an
//! out-of-scope concern (spec.md §1: "individual servlet implementations")
//! behind a trait the embedder supplies.
//!
//! The dispatcher here polls the accept queue and the async-completion
//! queue with a short sleep backoff rather than blocking on a single
//! multiplexed wait, since they are two independently-typed
//! `EventQueue<T>`s (see `event::queue`'s module doc) instead of the
//! original's one tagged-union queue. This trades a small bounded latency
//! floor for not needing a hand-rolled cross-queue select primitive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::async_task::AsyncTaskEvent;
use crate::cnode::CriticalNodeInfo;
use crate::error::CoreError;
use crate::event::{AcceptedConnection, EventQueue};
use crate::graph::ServiceGraph;
use crate::ids::{NodeId, PipeId, RequestId};
use crate::observability::{EngineEvent, SharedLogger};
use crate::pipe::{PipeHandle, PipeHandleRuntime};
use crate::rls::RequestLocalScope;
use crate::task::{self, RequestStatus, Task, TaskTable};

const IDLE_BACKOFF: Duration = Duration::from_millis(5);
const WORKER_WAIT: Duration = Duration::from_millis(20);

/// What a servlet's exec entry point reported for one of its output pds.
/// Concrete servlet execution is out of scope for this crate (spec.md §1);
/// `ServletExec` is the seam an embedder's servlet-ABI shim implements.
pub enum NodeOutcome {
    /// The servlet produced a handle on `pipe`; the scheduler routes it to
    /// whatever the graph wires that pd to.
    Output { pipe: PipeId, handle: PipeHandle },
    /// The servlet deferred `pipe`'s output to the async task service; a
    /// later `AsyncTaskEvent` resumes routing for it.
    Deferred { pipe: PipeId },
    /// The servlet wrote nothing on `pipe` for this invocation (spec.md
    /// §7's "servlet returning with no bytes written" case); every
    /// downstream reader of `pipe` is cancelled.
    NoOutput { pipe: PipeId },
}

/// Object-safe seam for invoking a node's exec entry point. `external_output`
/// carries the request's root response handle when `task.node` is the
/// service graph's output node, letting the terminal servlet write directly
/// into it rather than producing a fresh pipe the scheduler has nowhere to
/// route.
pub trait ServletExec: Send + Sync {
    fn exec(
        &self,
        task: &Task,
        pipes: &PipeHandleRuntime,
        external_output: Option<PipeHandle>,
    ) -> Result<Vec<NodeOutcome>, CoreError>;
}

struct ReadySignal {
    gate: Mutex<()>,
    condvar: Condvar,
}

impl ReadySignal {
    fn new() -> Self {
        Self {
            gate: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    fn notify(&self) {
        self.condvar.notify_all();
    }

    fn wait_a_bit(&self) {
        let mut guard = self.gate.lock();
        self.condvar.wait_for(&mut guard, WORKER_WAIT);
    }
}

/// Tunables for a running `Scheduler`.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    pub worker_count: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { worker_count: 4 }
    }
}

struct Shared {
    graph: Arc<ServiceGraph>,
    cnode: Arc<CriticalNodeInfo>,
    tasks: Arc<TaskTable>,
    pipes: Arc<PipeHandleRuntime>,
    exec: Arc<dyn ServletExec>,
    logger: SharedLogger,
    killed: Arc<AtomicBool>,
    ready: Arc<ReadySignal>,
}

impl Shared {
    /// Routes a handle produced on `node`'s `pipe` output to every edge the
    /// graph wires it to, forking a shadow copy for every edge but the
    /// last. An orphan output (no reader at all) is purged rather than
    /// leaked. Takes `request`/`node` directly (rather than `&Task`) so
    /// both the worker's own post-exec routing and the dispatcher's
    /// async-completion routing — which only ever has `request`/`node`, not
    /// a live `Task` — can call through the same path.
    fn route_output(
        &self,
        request: RequestId,
        node: NodeId,
        pipe: PipeId,
        handle: PipeHandle,
    ) -> Result<(), CoreError> {
        if Some(node) == self.graph.output_node() && pipe == task::EXTERNAL_OUTPUT_PIPE {
            return self.tasks.output_pipe(request, node, pipe, handle);
        }

        let edges: Vec<_> = self
            .graph
            .node(node)
            .map(|n| {
                n.outputs
                    .iter()
                    .copied()
                    .filter(|e| e.from_pipe == pipe)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        match edges.len() {
            0 => {
                let _ = self.pipes.deallocate(handle);
                Ok(())
            }
            1 => {
                let edge = edges[0];
                self.tasks
                    .output_pipe_to(request, node, pipe, edge.to, edge.to_pipe, handle)
                    .map(|_| ())
            }
            _ => {
                let last = edges.len() - 1;
                for (i, edge) in edges.into_iter().enumerate() {
                    let delivered = if i == last { handle } else { self.pipes.fork(&handle)? };
                    self.tasks
                        .output_pipe_to(request, node, pipe, edge.to, edge.to_pipe, delivered)?;
                }
                Ok(())
            }
        }
    }

    /// Treats "no output on `pipe`" as cancellation for every edge it would
    /// otherwise have fed.
    fn cancel_output(&self, request: RequestId, node: NodeId, pipe: PipeId, scope: &RequestLocalScope) {
        if Some(node) == self.graph.output_node() && pipe == task::EXTERNAL_OUTPUT_PIPE {
            if let Some(handle) = self.tasks.take_external_output(request) {
                let _ = self.pipes.deallocate(handle);
            }
            // The request just lost its one way out; any entry this
            // request's nodes staged into the scope but never committed to
            // pipe data is now unreachable.
            scope.dispose_uncommitted();
            return;
        }
        let edges: Vec<_> = self
            .graph
            .node(node)
            .map(|n| n.outputs.iter().copied().filter(|e| e.from_pipe == pipe).collect::<Vec<_>>())
            .unwrap_or_default();
        for edge in edges {
            let _ = self.tasks.input_cancelled(request, edge.to, edge.to_pipe);
        }
    }

    /// Logs a cancellation and, when `node` is critical, proactively purges
    /// the request's external output as soon as the precomputed cluster
    /// shows it is doomed, rather than waiting for the reactive cascade to
    /// walk every intermediate node first.
    fn propagate_cancellation(&self, request: RequestId, node: NodeId, scope: &RequestLocalScope) {
        let critical = self.cnode.is_critical(node);
        self.logger.log(&EngineEvent::TaskCancelled { request, node, critical });
        if !critical {
            return;
        }
        if let Ok(Some(info)) = self.cnode.boundary(node) {
            for edge in &info.boundary {
                let _ = self.tasks.input_cancelled(request, edge.node, edge.pipe);
            }
            if info.output_cancelled {
                if let Some(handle) = self.tasks.take_external_output(request) {
                    let _ = self.pipes.deallocate(handle);
                }
                // The precomputed cluster already shows the output is
                // doomed; no need to wait for the reactive cascade to reach
                // it before reclaiming whatever this request never
                // committed.
                scope.dispose_uncommitted();
            }
        }
    }

    fn run_task(&self, task: Task) {
        let request = task.request;
        let node = task.node;
        self.logger.log(&EngineEvent::TaskDispatched { request, node });

        let external_output = if Some(node) == self.graph.output_node() {
            self.tasks.peek_external_output(request)
        } else {
            None
        };

        match self.exec.exec(&task, &self.pipes, external_output) {
            Ok(outcomes) => {
                for outcome in outcomes {
                    match outcome {
                        NodeOutcome::Output { pipe, handle } => {
                            if let Err(err) = self.route_output(request, node, pipe, handle) {
                                tracing::warn!(error = %err, ?request, ?node, "failed to route task output");
                            }
                        }
                        NodeOutcome::NoOutput { pipe } => {
                            self.cancel_output(request, node, pipe, &task.scope);
                            self.propagate_cancellation(request, node, &task.scope);
                        }
                        NodeOutcome::Deferred { .. } => {}
                    }
                }
                if Some(node) == self.graph.output_node() {
                    self.tasks.complete_request(request);
                    // A completed request has no more committed-to-be data
                    // coming; anything still uncommitted never made it into
                    // pipe data and is disposed now rather than at scope drop.
                    task.scope.dispose_uncommitted();
                    self.logger.log(&EngineEvent::RequestCompleted { request });
                }
                self.tasks.free(task);
            }
            Err(err) => {
                tracing::warn!(error = %err, ?request, ?node, "servlet exec failed; cancelling downstream");
                if let Some(n) = self.graph.node(node) {
                    for edge in n.outputs.clone() {
                        let _ = self.tasks.input_cancelled(request, edge.to, edge.to_pipe);
                    }
                }
                self.propagate_cancellation(request, node, &task.scope);
                self.tasks.free(task);
            }
        }
        self.ready.notify();
    }

    fn handle_accept(&self, conn: AcceptedConnection) {
        let scope = RequestLocalScope::new();
        match self.tasks.new_request(scope, conn.input, conn.output) {
            Ok(request) => {
                self.logger.log(&EngineEvent::RequestStarted { request });
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to admit accepted connection as a new request");
            }
        }
        self.ready.notify();
    }

    fn handle_async(&self, event: AsyncTaskEvent) {
        match event.handle {
            Some(handle) => {
                if let Err(err) = self.route_output(event.request, event.node, event.pipe, handle) {
                    tracing::warn!(error = %err, request = ?event.request, node = ?event.node, "failed to route async task output");
                }
            }
            None => {
                let scope = self
                    .tasks
                    .scope_for(event.request, event.node)
                    .unwrap_or_else(|_| RequestLocalScope::new());
                self.cancel_output(event.request, event.node, event.pipe, &scope);
                self.propagate_cancellation(event.request, event.node, &scope);
            }
        }
        self.ready.notify();
    }
}

/// Runs the dispatcher thread (drains the accept and async-completion
/// queues, admitting new requests and resuming deferred ones) plus a
/// configurable pool of worker threads (drain `TaskTable::next_ready_task`
/// and invoke the servlet). Mirrors the original's single scheduler thread
/// fed by a worker pool, split here across two thread kinds because two
/// independently-typed `EventQueue`s feed the dispatcher rather than one.
pub struct Scheduler {
    shared: Arc<Shared>,
    dispatcher: Option<std::thread::JoinHandle<()>>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl Scheduler {
    pub fn spawn(
        graph: Arc<ServiceGraph>,
        tasks: Arc<TaskTable>,
        pipes: Arc<PipeHandleRuntime>,
        exec: Arc<dyn ServletExec>,
        logger: SharedLogger,
        accepts: Arc<EventQueue<AcceptedConnection>>,
        async_completions: Arc<EventQueue<AsyncTaskEvent>>,
        config: SchedulerConfig,
    ) -> Self {
        let cnode = graph.critical_node_info();
        let shared = Arc::new(Shared {
            graph,
            cnode,
            tasks,
            pipes,
            exec,
            logger,
            killed: Arc::new(AtomicBool::new(false)),
            ready: Arc::new(ReadySignal::new()),
        });

        let dispatcher = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("plumber-dispatcher".to_string())
                .spawn(move || {
                    while !shared.killed.load(Ordering::Acquire) {
                        let mut did_work = false;
                        if let Some(conn) = accepts.try_take() {
                            shared.handle_accept(conn);
                            did_work = true;
                        }
                        if let Some(event) = async_completions.try_take() {
                            shared.handle_async(event);
                            did_work = true;
                        }
                        if !did_work {
                            std::thread::sleep(IDLE_BACKOFF);
                        }
                    }
                })
                .expect("failed to spawn scheduler dispatcher thread")
        };

        let workers = (0..config.worker_count.max(1))
            .map(|i| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("plumber-worker-{i}"))
                    .spawn(move || {
                        while !shared.killed.load(Ordering::Acquire) {
                            match shared.tasks.next_ready_task() {
                                Some(task) => shared.run_task(task),
                                None => shared.ready.wait_a_bit(),
                            }
                        }
                    })
                    .expect("failed to spawn scheduler worker thread")
            })
            .collect();

        Self {
            shared,
            dispatcher: Some(dispatcher),
            workers,
        }
    }

    /// Requests cooperative shutdown and waits for every dispatcher/worker
    /// thread to exit. Threads only observe `killed` between iterations, so
    /// this can block briefly on whatever iteration is in flight.
    pub fn shutdown(mut self) {
        self.shared.killed.store(true, Ordering::Release);
        self.shared.ready.notify();
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
