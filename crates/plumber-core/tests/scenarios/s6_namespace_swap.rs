//! S6 (namespace swap): `Stab::dispose_instances` starts a fresh namespace
//! generation without disturbing a request already running against the
//! servlet instances the old namespace resolved. A later `load` for the
//! same `argv` gets a brand new instance rather than the disposed one, but
//! a scheduler mid-flight on the old graph sees nothing change underneath
//! it.

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
use plumber_core::stab::{Stab, StabTestHooks};
use plumber_core::task::{self, RequestStatus, TaskTable};
use plumber_core::test_stubs::{ByteStore, StubLoader};

use support::{exec_arc, wait_until, ByNode};

#[test]
fn dispose_instances_does_not_disturb_an_in_flight_request() {
    let stab = Stab::new(Arc::new(StubLoader));
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    StabTestHooks::set_trap(&stab, move |id| seen_clone.lock().unwrap().push(id));

    let argv = vec!["passthrough".to_string()];
    let first = stab.load(&argv, false).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(stab.current_generation(), 0);

    let mut builder = GraphBuilder::new();
    let i = builder.add_node(first);
    let o = builder.add_node(first);
    builder.set_input(i);
    builder.set_output(o);
    builder.add_edge(i, PipeId::new(0), o, PipeId::new(0)).unwrap();
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
                    let mut buf = [0u8; 64];
                    let n = pipes.read(&input, &mut buf)?;
                    let out = pipes.allocate(ModuleId::new(0), Direction::Out)?;
                    pipes.write(&out, &buf[..n])?;
                    Ok(vec![NodeOutcome::Output { pipe: PipeId::new(0), handle: out }])
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
        SchedulerConfig { worker_count: 2 },
    );

    let input_handle = pipes.allocate(ModuleId::new(0), Direction::In).unwrap();
    store.write(&input_handle, b"steady").unwrap();
    let output_handle = pipes.allocate(ModuleId::new(0), Direction::Out).unwrap();
    accepts
        .put(
            accept_producer,
            AcceptedConnection { module: ModuleId::new(0), input: input_handle, output: output_handle },
        )
        .unwrap();

    // Swap the namespace while the request above may still be in flight.
    // `Stab` only governs what `load` resolves next; it holds no reference
    // to the running graph or scheduler at all, so this has nothing to
    // disturb there.
    let generation = stab.dispose_instances();
    assert_eq!(generation, 1);
    assert!(stab.owner(first).is_err(), "disposed instance should no longer be addressable");

    let completed = wait_until(200, || tasks.request_status(RequestId::new(0)) == Some(RequestStatus::Completed));
    assert!(completed, "in-flight request was disrupted by the namespace swap");
    assert_eq!(store.peek(&output_handle), b"steady");

    let second = stab.load(&argv, false).unwrap();
    assert_ne!(first, second, "loading the same argv after a swap must produce a fresh instance");
    assert_eq!(seen.lock().unwrap().len(), 2);

    scheduler.shutdown();
}
