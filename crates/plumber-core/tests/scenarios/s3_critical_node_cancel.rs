//! S3 (critical-node cancel): `I -> C -> {X, Y} -> O`, where `C` is the
//! only predecessor of both `X` and `Y`. When `C`'s exec writes zero bytes,
//! `X`, `Y`, and `O` must all receive cancellation, the request's external
//! output handle must be purged rather than written to, and the request
//! must finish as cancelled rather than hang.

#[path = "support.rs"]
mod support;

use std::sync::Arc;

use plumber_core::async_task::AsyncTaskEvent;
use plumber_core::event::{AcceptedConnection, EventQueue};
use plumber_core::graph::GraphBuilder;
use plumber_core::ids::{ModuleId, PipeId, RequestId, ServletId};
use plumber_core::observability::default_logger;
use plumber_core::pipe::{Direction, PipeHandleRuntime};
use plumber_core::scheduler::{NodeOutcome, Scheduler, SchedulerConfig};
use plumber_core::task::{self, RequestStatus, TaskTable};
use plumber_core::test_stubs::ByteStore;

use support::{exec_arc, wait_until, ByNode};

#[test]
fn critical_node_zero_output_cancels_its_whole_cluster() {
    let mut builder = GraphBuilder::new();
    let i = builder.add_node(ServletId::new(0));
    let c = builder.add_node(ServletId::new(1));
    let x = builder.add_node(ServletId::new(2));
    let y = builder.add_node(ServletId::new(3));
    let o = builder.add_node(ServletId::new(4));
    builder.set_input(i);
    builder.set_output(o);
    builder.add_edge(i, PipeId::new(0), c, PipeId::new(0)).unwrap();
    builder.add_edge(c, PipeId::new(0), x, PipeId::new(0)).unwrap();
    builder.add_edge(c, PipeId::new(0), y, PipeId::new(0)).unwrap();
    builder.add_edge(x, PipeId::new(0), o, PipeId::new(0)).unwrap();
    builder.add_edge(y, PipeId::new(0), o, PipeId::new(1)).unwrap();
    let graph = Arc::new(builder.finalize().unwrap());

    let tasks = Arc::new(TaskTable::new(graph.clone()));
    let pipes = Arc::new(PipeHandleRuntime::new());
    let store = Arc::new(ByteStore::new(ModuleId::new(0)));
    pipes.register(store.clone());

    let exec = ByNode {
        nodes: vec![
            (
                i,
                exec_arc(|_t, pipes, _ext| {
                    let out = pipes.allocate(ModuleId::new(0), Direction::Out)?;
                    pipes.write(&out, b"go")?;
                    Ok(vec![NodeOutcome::Output { pipe: PipeId::new(0), handle: out }])
                }),
            ),
            (
                c,
                // Writes zero bytes: the scenario's trigger for cancelling
                // everything downstream.
                exec_arc(|_t, _pipes, _ext| Ok(vec![NodeOutcome::NoOutput { pipe: PipeId::new(0) }])),
            ),
            (
                x,
                exec_arc(|_t, pipes, _ext| {
                    let out = pipes.allocate(ModuleId::new(0), Direction::Out)?;
                    pipes.write(&out, b"x")?;
                    Ok(vec![NodeOutcome::Output { pipe: PipeId::new(0), handle: out }])
                }),
            ),
            (
                y,
                exec_arc(|_t, pipes, _ext| {
                    let out = pipes.allocate(ModuleId::new(0), Direction::Out)?;
                    pipes.write(&out, b"y")?;
                    Ok(vec![NodeOutcome::Output { pipe: PipeId::new(0), handle: out }])
                }),
            ),
            (
                o,
                exec_arc(|_t, _pipes, ext| {
                    let out = ext.expect("output node always has its external output seeded");
                    Ok(vec![NodeOutcome::Output { pipe: task::EXTERNAL_OUTPUT_PIPE, handle: out }])
                }),
            ),
        ],
    };

    let accepts: Arc<EventQueue<AcceptedConnection>> = Arc::new(EventQueue::new());
    let accept_producer = accepts.register_producer(4);
    let async_completions: Arc<EventQueue<AsyncTaskEvent>> = Arc::new(EventQueue::new());

    let scheduler = Scheduler::spawn(
        graph,
        tasks.clone(),
        pipes.clone(),
        Arc::new(exec),
        default_logger(),
        accepts.clone(),
        async_completions,
        SchedulerConfig { worker_count: 4 },
    );

    let input_handle = pipes.allocate(ModuleId::new(0), Direction::In).unwrap();
    let output_handle = pipes.allocate(ModuleId::new(0), Direction::Out).unwrap();

    accepts
        .put(
            accept_producer,
            AcceptedConnection { module: ModuleId::new(0), input: input_handle, output: output_handle },
        )
        .unwrap();

    let request = RequestId::new(0);
    let settled = wait_until(200, || {
        matches!(
            tasks.request_status(request),
            Some(RequestStatus::Cancelled) | Some(RequestStatus::Completed)
        )
    });
    assert!(settled, "request never settled");
    assert_eq!(tasks.request_status(request), Some(RequestStatus::Cancelled));

    // X and Y never ran (their only input was cancelled structurally), so O
    // never saw a real handle to write through: nothing was ever buffered
    // into the external output, and the proactive critical-cluster purge
    // (since C's cluster covers O) already reclaimed the handle.
    assert!(store.peek(&output_handle).is_empty());

    scheduler.shutdown();
}
