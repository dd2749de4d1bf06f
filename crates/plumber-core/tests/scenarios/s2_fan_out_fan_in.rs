//! S2 (fan-out / fan-in): `I -> {A, B} -> M -> O`, `A` producing `"1"` and
//! `B` producing `"2"`; `M` concatenates its inputs in pd-id order, so the
//! final output must be `"12"` regardless of which of `A`/`B` finishes
//! first.

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
fn fan_out_fan_in_concatenates_in_pd_order() {
    let mut builder = GraphBuilder::new();
    let i = builder.add_node(ServletId::new(0));
    let a = builder.add_node(ServletId::new(1));
    let b = builder.add_node(ServletId::new(2));
    let m = builder.add_node(ServletId::new(3));
    let o = builder.add_node(ServletId::new(4));
    builder.set_input(i);
    builder.set_output(o);
    builder.add_edge(i, PipeId::new(0), a, PipeId::new(0)).unwrap();
    builder.add_edge(i, PipeId::new(0), b, PipeId::new(0)).unwrap();
    builder.add_edge(a, PipeId::new(0), m, PipeId::new(0)).unwrap();
    builder.add_edge(b, PipeId::new(0), m, PipeId::new(1)).unwrap();
    builder.add_edge(m, PipeId::new(0), o, PipeId::new(0)).unwrap();
    let graph = Arc::new(builder.finalize().unwrap());

    let tasks = Arc::new(TaskTable::new(graph.clone()));
    let pipes = Arc::new(PipeHandleRuntime::new());
    let store = Arc::new(ByteStore::new(ModuleId::new(0)));
    pipes.register(store.clone());

    let exec = ByNode {
        nodes: vec![
            (
                i,
                exec_arc(|t, pipes, _ext| {
                    let input = *t.input(task::EXTERNAL_INPUT_PIPE).unwrap();
                    let mut buf = [0u8; 8];
                    let n = pipes.read(&input, &mut buf)?;
                    let out = pipes.allocate(ModuleId::new(0), Direction::Out)?;
                    pipes.write(&out, &buf[..n])?;
                    Ok(vec![NodeOutcome::Output { pipe: PipeId::new(0), handle: out }])
                }),
            ),
            (
                a,
                exec_arc(|_t, pipes, _ext| {
                    let out = pipes.allocate(ModuleId::new(0), Direction::Out)?;
                    pipes.write(&out, b"1")?;
                    Ok(vec![NodeOutcome::Output { pipe: PipeId::new(0), handle: out }])
                }),
            ),
            (
                b,
                exec_arc(|_t, pipes, _ext| {
                    let out = pipes.allocate(ModuleId::new(0), Direction::Out)?;
                    pipes.write(&out, b"2")?;
                    Ok(vec![NodeOutcome::Output { pipe: PipeId::new(0), handle: out }])
                }),
            ),
            (
                m,
                exec_arc(|t, pipes, _ext| {
                    let from_a = *t.input(PipeId::new(0)).unwrap();
                    let from_b = *t.input(PipeId::new(1)).unwrap();
                    let mut concatenated = Vec::new();
                    for handle in [from_a, from_b] {
                        let mut buf = [0u8; 8];
                        let n = pipes.read(&handle, &mut buf)?;
                        concatenated.extend_from_slice(&buf[..n]);
                    }
                    let out = pipes.allocate(ModuleId::new(0), Direction::Out)?;
                    pipes.write(&out, &concatenated)?;
                    Ok(vec![NodeOutcome::Output { pipe: PipeId::new(0), handle: out }])
                }),
            ),
            (
                o,
                exec_arc(|t, pipes, ext| {
                    let input = *t.input(PipeId::new(0)).unwrap();
                    let mut buf = [0u8; 8];
                    let n = pipes.read(&input, &mut buf)?;
                    let out = ext.expect("output node always has its external output seeded");
                    pipes.write(&out, &buf[..n])?;
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
    store.write(&input_handle, b"seed").unwrap();
    let output_handle = pipes.allocate(ModuleId::new(0), Direction::Out).unwrap();

    accepts
        .put(
            accept_producer,
            AcceptedConnection { module: ModuleId::new(0), input: input_handle, output: output_handle },
        )
        .unwrap();

    let request = RequestId::new(0);
    let completed = wait_until(200, || tasks.request_status(request) == Some(RequestStatus::Completed));
    assert!(completed, "request never completed");
    assert_eq!(store.peek(&output_handle), b"12");

    scheduler.shutdown();
}
