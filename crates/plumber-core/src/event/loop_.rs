//! Event loop: one dedicated OS thread per accepting transport module,
//! translating its `accept`/readiness notifications into events pushed
//! onto the shared `EventQueue` for the scheduler to drain. Grounded on
//! *origin: include/itc/equeue.h*'s note that each accepting module owns
//! its own thread rather than sharing the scheduler's worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::ids::{EqueueToken, ModuleId};
use crate::pipe::{PipeHandle, PipeHandleRuntime};

use super::queue::EventQueue;

/// An event produced by an accepting transport's loop: a freshly accepted
/// (input, output) pipe handle pair ready for a new request.
pub struct AcceptedConnection {
    pub module: ModuleId,
    pub input: PipeHandle,
    pub output: PipeHandle,
}

/// Owns the background thread that repeatedly calls `TransportModule::accept`
/// for one module and forwards the result to the shared queue, until asked
/// to stop.
pub struct EventLoop {
    killed: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Spawns the accept loop for `module`. The loop exits, rather than
    /// retrying forever, the first time `accept` returns an error: a
    /// transport's accept failing is treated as fatal for that module,
    /// matching the original's module-thread-death-means-module-down
    /// contract.
    pub fn spawn(
        module: ModuleId,
        runtime: Arc<PipeHandleRuntime>,
        queue: Arc<EventQueue<AcceptedConnection>>,
        producer: EqueueToken,
    ) -> Self {
        let killed = Arc::new(AtomicBool::new(false));
        let loop_killed = killed.clone();

        let handle = std::thread::Builder::new()
            .name(format!("plumber-accept-{}", module.raw()))
            .spawn(move || {
                while !loop_killed.load(Ordering::Acquire) {
                    match runtime.accept(module) {
                        Ok((input, output)) => {
                            let connection = AcceptedConnection {
                                module,
                                input,
                                output,
                            };
                            if queue.put(producer, connection).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            })
            .expect("failed to spawn accept thread");

        Self {
            killed,
            handle: Some(handle),
        }
    }

    /// Requests cooperative shutdown and waits for the thread to exit. The
    /// thread only observes this between `accept` calls, so a transport
    /// whose `accept` blocks forever must be unblocked by the caller first
    /// (e.g. by closing its listening handle).
    pub fn stop(mut self) {
        self.killed.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.killed.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
