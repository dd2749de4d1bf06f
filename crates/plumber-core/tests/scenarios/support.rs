//! Shared helpers for the end-to-end scenario tests under this directory.
//! Each scenario file includes this with `#[path = "support.rs"]` since
//! every file under `tests/` compiles as its own crate.

#![allow(dead_code)]

use std::sync::Arc;

use plumber_core::error::CoreError;
use plumber_core::ids::NodeId;
use plumber_core::pipe::{PipeHandle, PipeHandleRuntime};
use plumber_core::scheduler::{NodeOutcome, ServletExec};
use plumber_core::task::Task;

/// Adapts a plain closure to `ServletExec`, so each scenario can describe
/// its nodes' behavior inline instead of a one-off struct per node.
pub struct FnExec<F>(pub F)
where
    F: Fn(&Task, &PipeHandleRuntime, Option<PipeHandle>) -> Result<Vec<NodeOutcome>, CoreError>
        + Send
        + Sync;

impl<F> ServletExec for FnExec<F>
where
    F: Fn(&Task, &PipeHandleRuntime, Option<PipeHandle>) -> Result<Vec<NodeOutcome>, CoreError>
        + Send
        + Sync,
{
    fn exec(
        &self,
        task: &Task,
        pipes: &PipeHandleRuntime,
        external_output: Option<PipeHandle>,
    ) -> Result<Vec<NodeOutcome>, CoreError> {
        (self.0)(task, pipes, external_output)
    }
}

/// Wraps a closure as `Arc<dyn ServletExec>` directly, so a `Vec` of
/// differently-typed closures can be collected into one homogeneous list
/// without each call site spelling out the trait-object cast.
pub fn exec_arc<F>(f: F) -> Arc<dyn ServletExec>
where
    F: Fn(&Task, &PipeHandleRuntime, Option<PipeHandle>) -> Result<Vec<NodeOutcome>, CoreError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnExec(f))
}

/// Dispatches to one of several node-keyed execs, for graphs with more than
/// one distinct node behavior.
pub struct ByNode {
    pub nodes: Vec<(NodeId, Arc<dyn ServletExec>)>,
}

impl ServletExec for ByNode {
    fn exec(
        &self,
        task: &Task,
        pipes: &PipeHandleRuntime,
        external_output: Option<PipeHandle>,
    ) -> Result<Vec<NodeOutcome>, CoreError> {
        self.nodes
            .iter()
            .find(|(node, _)| *node == task.node)
            .expect("every node in the graph has a registered exec")
            .1
            .exec(task, pipes, external_output)
    }
}

/// Polls `f` every 5ms until it returns `true` or `attempts` is exhausted,
/// returning whether it ever became true. Scenario tests use this instead
/// of a fixed sleep since the scheduler's worker/dispatcher threads run on
/// their own schedule.
pub fn wait_until(mut attempts: u32, mut f: impl FnMut() -> bool) -> bool {
    loop {
        if f() {
            return true;
        }
        if attempts == 0 {
            return false;
        }
        attempts -= 1;
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
}
