//! S4 (async deferred): `I -> A -> O`, where `A` defers its work to
//! `AsyncTaskService` instead of producing a handle inline. A slow request
//! must not block a second, faster request queued right behind it — the
//! scheduler has to keep making progress on other tasks while the first
//! one's async work is still in flight — and the slow request must still
//! eventually complete once its `AsyncTaskEvent` arrives.

#[path = "support.rs"]
mod support;

use std::sync::Arc;
use std::time::Duration;

use plumber_core::async_task::{AsyncTaskEvent, AsyncTaskService};
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
fn slow_deferred_request_does_not_block_a_faster_one() {
    let mut builder = GraphBuilder::new();
    let i = builder.add_node(ServletId::new(0));
    let a = builder.add_node(ServletId::new(1));
    let o = builder.add_node(ServletId::new(2));
    builder.set_input(i);
    builder.set_output(o);
    builder.add_edge(i, PipeId::new(0), a, PipeId::new(0)).unwrap();
    builder.add_edge(a, PipeId::new(0), o, PipeId::new(0)).unwrap();
    let graph = Arc::new(builder.finalize().unwrap());

    let tasks = Arc::new(TaskTable::new(graph.clone()));
    let pipes = Arc::new(PipeHandleRuntime::new());
    let store = Arc::new(ByteStore::new(ModuleId::new(0)));
    pipes.register(store.clone());

    let async_service = Arc::new(AsyncTaskService::new(2));
    let async_completions: Arc<EventQueue<AsyncTaskEvent>> = Arc::new(EventQueue::new());
    let async_producer = async_completions.register_producer(8);

    let slow_request = RequestId::new(0);

    let exec = {
        let pipes_for_async = pipes.clone();
        let async_service = async_service.clone();
        let async_completions = async_completions.clone();
        ByNode {
            nodes: vec![
                (
                    i,
                    exec_arc(|t, pipes, _ext| {
                        let input = *t.input(task::EXTERNAL_INPUT_PIPE).unwrap();
                        let mut buf = [0u8; 64];
                        let n = pipes.read(&input, &mut buf)?;
                        let out = pipes.allocate(ModuleId::new(0), Direction::Out)?;
                        pipes.write(&out, &buf[..n])?;
                        Ok(vec![NodeOutcome::Output { pipe: PipeId::new(0), handle: out }])
                    }),
                ),
                (
                    a,
                    exec_arc(move |t, pipes, _ext| {
                        let input = *t.input(PipeId::new(0)).unwrap();
                        let mut buf = [0u8; 64];
                        let n = pipes.read(&input, &mut buf)?;
                        let mut reversed = buf[..n].to_vec();
                        reversed.reverse();

                        if t.request == slow_request {
                            let pipes_for_async = pipes_for_async.clone();
                            async_service.spawn(
                                t.request,
                                t.node,
                                PipeId::new(0),
                                async_completions.clone(),
                                async_producer,
                                move || {
                                    std::thread::sleep(Duration::from_millis(60));
                                    let out = pipes_for_async
                                        .allocate(ModuleId::new(0), Direction::Out)
                                        .expect("allocate deferred output");
                                    pipes_for_async
                                        .write(&out, &reversed)
                                        .expect("write deferred output");
                                    (0, Some(out))
                                },
                            );
                            Ok(vec![NodeOutcome::Deferred { pipe: PipeId::new(0) }])
                        } else {
                            let out = pipes.allocate(ModuleId::new(0), Direction::Out)?;
                            pipes.write(&out, &reversed)?;
                            Ok(vec![NodeOutcome::Output { pipe: PipeId::new(0), handle: out }])
                        }
                    }),
                ),
                (
                    o,
                    exec_arc(|t, pipes, ext| {
                        let input = *t.input(PipeId::new(0)).unwrap();
                        let mut buf = [0u8; 64];
                        let n = pipes.read(&input, &mut buf)?;
                        let out = ext.expect("output node always has its external output seeded");
                        pipes.write(&out, &buf[..n])?;
                        Ok(vec![NodeOutcome::Output { pipe: task::EXTERNAL_OUTPUT_PIPE, handle: out }])
                    }),
                ),
            ],
        }
    };

    let accepts: Arc<EventQueue<AcceptedConnection>> = Arc::new(EventQueue::new());
    let accept_producer = accepts.register_producer(4);

    let scheduler = Scheduler::spawn(
        graph,
        tasks.clone(),
        pipes.clone(),
        Arc::new(exec),
        default_logger(),
        accepts.clone(),
        async_completions,
        SchedulerConfig { worker_count: 2 },
    );

    let slow_input = pipes.allocate(ModuleId::new(0), Direction::In).unwrap();
    store.write(&slow_input, b"abcd").unwrap();
    let slow_output = pipes.allocate(ModuleId::new(0), Direction::Out).unwrap();
    accepts
        .put(
            accept_producer,
            AcceptedConnection { module: ModuleId::new(0), input: slow_input, output: slow_output },
        )
        .unwrap();

    let fast_request = RequestId::new(1);
    let fast_input = pipes.allocate(ModuleId::new(0), Direction::In).unwrap();
    store.write(&fast_input, b"wxyz").unwrap();
    let fast_output = pipes.allocate(ModuleId::new(0), Direction::Out).unwrap();
    accepts
        .put(
            accept_producer,
            AcceptedConnection { module: ModuleId::new(0), input: fast_input, output: fast_output },
        )
        .unwrap();

    let fast_completed = wait_until(100, || tasks.request_status(fast_request) == Some(RequestStatus::Completed));
    assert!(fast_completed, "faster request never completed");
    assert_eq!(store.peek(&fast_output), b"zyxw");
    assert_ne!(
        tasks.request_status(slow_request),
        Some(RequestStatus::Completed),
        "slow request should still be waiting on its deferred async work"
    );

    let slow_completed = wait_until(100, || tasks.request_status(slow_request) == Some(RequestStatus::Completed));
    assert!(slow_completed, "slow deferred request never completed");
    assert_eq!(store.peek(&slow_output), b"dcba");

    scheduler.shutdown();
    Arc::try_unwrap(async_service)
        .unwrap_or_else(|_| panic!("async service still has outstanding clones"))
        .shutdown();
}
