//! Async task service: lets a servlet flagged async hand its work to a
//! worker pool and return immediately, resuming the scheduler once that
//! work completes. Grounded on spec.md §4.12 and *origin:
//! include/itc/equeue.h*'s `itc_equeue_task_event_t` (the event that
//! carries an async handle's outcome back to the dispatcher).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::ids::{EqueueToken, NodeId, PipeId, RequestId};

use crate::event::EventQueue;
use crate::pipe::PipeHandle;

/// The event pushed onto the scheduler's completion queue once an async
/// handle's work finishes; the scheduler uses `request`/`node` to look up
/// the pending task and resume its downstream activation. `handle` carries
/// the pipe the deferred work finally produced; `None` mirrors a servlet
/// returning with no bytes written (spec.md §7), which the scheduler treats
/// as cancellation for every downstream reader of `pipe`.
#[derive(Clone, Copy, Debug)]
pub struct AsyncTaskEvent {
    pub request: RequestId,
    pub node: NodeId,
    pub pipe: PipeId,
    pub retcode: i32,
    pub handle: Option<PipeHandle>,
}

struct AsyncState {
    retcode: Mutex<Option<i32>>,
    ready: Condvar,
}

/// A handle to one outstanding piece of async work. Cloning shares the
/// same underlying state, so both the servlet (waiting) and the worker
/// thread (completing) can hold a copy.
#[derive(Clone)]
pub struct AsyncHandle {
    state: Arc<AsyncState>,
}

impl AsyncHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(AsyncState {
                retcode: Mutex::new(None),
                ready: Condvar::new(),
            }),
        }
    }

    /// Parks the calling thread until `notify_wait` delivers a return
    /// code, then returns it.
    pub fn set_wait(&self) -> i32 {
        let mut guard = self.state.retcode.lock();
        loop {
            if let Some(code) = *guard {
                return code;
            }
            self.state.ready.wait(&mut guard);
        }
    }

    /// Delivers the outcome and wakes anyone parked in `set_wait`. Safe to
    /// call even if nobody is waiting yet.
    pub fn notify_wait(&self, retcode: i32) {
        *self.state.retcode.lock() = Some(retcode);
        self.state.ready.notify_all();
    }

    /// Non-blocking peek at the outcome, if it has already arrived.
    pub fn retcode(&self) -> Option<i32> {
        *self.state.retcode.lock()
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    available: Condvar,
    killed: AtomicBool,
}

/// A fixed-size worker pool that runs async servlet work off the
/// dispatcher thread, delivering completion as an `AsyncTaskEvent` on the
/// shared scheduler queue.
pub struct AsyncTaskService {
    queue: Arc<JobQueue>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl AsyncTaskService {
    pub fn new(worker_count: usize) -> Self {
        let queue = Arc::new(JobQueue {
            jobs: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            killed: AtomicBool::new(false),
        });

        let workers = (0..worker_count.max(1))
            .map(|i| {
                let queue = queue.clone();
                std::thread::Builder::new()
                    .name(format!("plumber-async-{i}"))
                    .spawn(move || loop {
                        let job = {
                            let mut jobs = queue.jobs.lock();
                            loop {
                                if let Some(job) = jobs.pop_front() {
                                    break Some(job);
                                }
                                if queue.killed.load(Ordering::Acquire) {
                                    break None;
                                }
                                queue.available.wait(&mut jobs);
                            }
                        };
                        match job {
                            Some(job) => job(),
                            None => break,
                        }
                    })
                    .expect("failed to spawn async worker thread")
            })
            .collect();

        Self { queue, workers }
    }

    /// Spawns `work` on the pool, returning a handle that resolves to
    /// `work`'s return code. `work` reports both a retcode and whatever
    /// pipe handle it produced (or `None` if it produced nothing). Once it
    /// finishes, an `AsyncTaskEvent` for `pipe` is pushed to `completion`
    /// under `producer` so the scheduler can resume `node`'s downstream
    /// activation for `request`.
    pub fn spawn<F>(
        &self,
        request: RequestId,
        node: NodeId,
        pipe: PipeId,
        completion: Arc<EventQueue<AsyncTaskEvent>>,
        producer: EqueueToken,
        work: F,
    ) -> AsyncHandle
    where
        F: FnOnce() -> (i32, Option<PipeHandle>) + Send + 'static,
    {
        let handle = AsyncHandle::new();
        let handle_for_job = handle.clone();
        let job: Job = Box::new(move || {
            let (retcode, produced) = work();
            let _ = completion.put(
                producer,
                AsyncTaskEvent {
                    request,
                    node,
                    pipe,
                    retcode,
                    handle: produced,
                },
            );
            handle_for_job.notify_wait(retcode);
        });
        self.queue.jobs.lock().push_back(job);
        self.queue.available.notify_one();
        handle
    }

    pub fn shutdown(self) {
        self.queue.killed.store(true, Ordering::Release);
        self.queue.available.notify_all();
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_wait_blocks_until_notify_wait() {
        let handle = AsyncHandle::new();
        let waiter = handle.clone();
        let joined = std::thread::spawn(move || waiter.set_wait());
        std::thread::sleep(std::time::Duration::from_millis(10));
        handle.notify_wait(7);
        assert_eq!(joined.join().unwrap(), 7);
    }

    #[test]
    fn spawned_work_delivers_a_completion_event() {
        use crate::ids::ModuleId;
        use crate::pipe::Direction;

        let service = AsyncTaskService::new(2);
        let completion: Arc<EventQueue<AsyncTaskEvent>> = Arc::new(EventQueue::new());
        let producer = completion.register_producer(8);

        let produced = PipeHandle {
            module: ModuleId::new(0),
            token: 7,
            direction: Direction::Out,
        };
        let handle = service.spawn(
            RequestId::new(1),
            NodeId::new(0),
            PipeId::new(0),
            completion.clone(),
            producer,
            move || (42, Some(produced)),
        );
        assert_eq!(handle.set_wait(), 42);

        let event = completion.try_take().expect("completion event delivered");
        assert_eq!(event.retcode, 42);
        assert_eq!(event.request, RequestId::new(1));
        assert_eq!(event.handle, Some(produced));

        service.shutdown();
    }
}
