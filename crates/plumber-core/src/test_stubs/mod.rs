//! In-process stand-ins for the seams this crate leaves to an embedder
//! (`pipe::TransportModule`, `stab::ServletLoader`, `scheduler::ServletExec`,
//! `event::EventPoll`) plus a couple of `observability::Logger`
//! implementations useful in tests. Gathered here instead of duplicated
//! per-module, the way each module's own `#[cfg(test)]` stub (`EchoModule`,
//! `OneShotModule`, `StubLoader`) was written ad hoc; this is the same
//! shape, exported for integration tests under the `test-util` feature.
//!
//! `EchoTransport` and `ByteStore` both implement `TransportModule` but
//! differ in how they store bytes: `EchoTransport` has one shared FIFO
//! across every handle (good enough for a straight pass-through), while
//! `ByteStore` keys a separate buffer per handle token, which scenarios
//! with more than one live pipe at once (fan-out, fan-in) need to avoid
//! cross-talk between them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::CoreError;
use crate::event::{EventPoll, PollEvent};
use crate::ids::{ModuleId, ScopeToken};
use crate::observability::{EngineEvent, Logger};
use crate::pdt::{Pdt, PipeFlags};
use crate::pipe::{Direction, PipeHandle, TransportModule};
use crate::stab::{LoadedServlet, ServletLoader, SignalPipes};

/// A `Logger` that discards every event, for tests that don't care about
/// observability output.
#[derive(Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _event: &EngineEvent) {}
}

/// A `Logger` that records every event in order, for tests that assert on
/// what the engine reported.
#[derive(Default)]
pub struct RecordingLogger {
    events: Mutex<Vec<EngineEvent>>,
}

impl Logger for RecordingLogger {
    fn log(&self, event: &EngineEvent) {
        self.events.lock().push(event.clone());
    }
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }
}

/// A `TransportModule` that loops bytes written back as the next `read`,
/// and fabricates fresh handles on every `allocate`/`accept`/`fork` call.
/// Good enough to drive the scheduler end to end without a real socket.
pub struct EchoTransport {
    id: ModuleId,
    path: String,
    next_token: AtomicU64,
    buffered: Mutex<VecDeque<Vec<u8>>>,
}

impl EchoTransport {
    pub fn new(id: ModuleId, path: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
            next_token: AtomicU64::new(0),
            buffered: Mutex::new(VecDeque::new()),
        }
    }
}

impl TransportModule for EchoTransport {
    fn module_id(&self) -> ModuleId {
        self.id
    }

    fn module_path(&self) -> &str {
        &self.path
    }

    fn allocate(&self, direction: Direction) -> Result<PipeHandle, CoreError> {
        Ok(PipeHandle {
            module: self.id,
            token: self.next_token.fetch_add(1, Ordering::SeqCst),
            direction,
        })
    }

    fn accept(&self) -> Result<(PipeHandle, PipeHandle), CoreError> {
        Ok((self.allocate(Direction::In)?, self.allocate(Direction::Out)?))
    }

    fn read(&self, _handle: &PipeHandle, buffer: &mut [u8]) -> Result<usize, CoreError> {
        let Some(chunk) = self.buffered.lock().pop_front() else {
            return Ok(0);
        };
        let n = buffer.len().min(chunk.len());
        buffer[..n].copy_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn write(&self, _handle: &PipeHandle, data: &[u8]) -> Result<usize, CoreError> {
        self.buffered.lock().push_back(data.to_vec());
        Ok(data.len())
    }

    fn write_scope_token(&self, _handle: &PipeHandle, _token: ScopeToken) -> Result<(), CoreError> {
        Ok(())
    }

    fn eof(&self, _handle: &PipeHandle) -> Result<bool, CoreError> {
        Ok(self.buffered.lock().is_empty())
    }

    fn cntl(&self, _handle: &PipeHandle, _opcode: u32, arg: i64) -> Result<i64, CoreError> {
        Ok(arg)
    }

    fn fork(&self, handle: &PipeHandle) -> Result<PipeHandle, CoreError> {
        self.allocate(handle.direction)
    }

    fn deallocate(&self, _handle: PipeHandle) -> Result<(), CoreError> {
        Ok(())
    }
}

/// A `TransportModule` backed by one independent byte buffer per handle
/// token, rather than `EchoTransport`'s single shared queue. Lets a test
/// wire up several distinct pipes (a fan-out's separate output pds, say)
/// that must not cross-talk, and still observe what ended up where by
/// handle rather than by read order.
pub struct ByteStore {
    id: ModuleId,
    next_token: AtomicU64,
    buffers: Mutex<std::collections::HashMap<u64, VecDeque<u8>>>,
}

impl ByteStore {
    pub fn new(id: ModuleId) -> Self {
        Self {
            id,
            next_token: AtomicU64::new(0),
            buffers: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Reads out everything buffered for `handle` so far, without
    /// disturbing transport state other tools would rely on.
    pub fn peek(&self, handle: &PipeHandle) -> Vec<u8> {
        self.buffers
            .lock()
            .get(&handle.token)
            .map(|buf| buf.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl TransportModule for ByteStore {
    fn module_id(&self) -> ModuleId {
        self.id
    }

    fn module_path(&self) -> &str {
        "pipe.test.byte_store"
    }

    fn allocate(&self, direction: Direction) -> Result<PipeHandle, CoreError> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.buffers.lock().insert(token, VecDeque::new());
        Ok(PipeHandle { module: self.id, token, direction })
    }

    fn accept(&self) -> Result<(PipeHandle, PipeHandle), CoreError> {
        Ok((self.allocate(Direction::In)?, self.allocate(Direction::Out)?))
    }

    fn read(&self, handle: &PipeHandle, buffer: &mut [u8]) -> Result<usize, CoreError> {
        let mut buffers = self.buffers.lock();
        let Some(buf) = buffers.get_mut(&handle.token) else {
            return Ok(0);
        };
        let n = buffer.len().min(buf.len());
        for slot in buffer.iter_mut().take(n) {
            *slot = buf.pop_front().expect("checked len above");
        }
        Ok(n)
    }

    fn write(&self, handle: &PipeHandle, data: &[u8]) -> Result<usize, CoreError> {
        self.buffers.lock().entry(handle.token).or_default().extend(data.iter().copied());
        Ok(data.len())
    }

    fn write_scope_token(&self, _handle: &PipeHandle, _token: ScopeToken) -> Result<(), CoreError> {
        Ok(())
    }

    fn eof(&self, handle: &PipeHandle) -> Result<bool, CoreError> {
        Ok(self.buffers.lock().get(&handle.token).map(|b| b.is_empty()).unwrap_or(true))
    }

    fn cntl(&self, _handle: &PipeHandle, _opcode: u32, arg: i64) -> Result<i64, CoreError> {
        Ok(arg)
    }

    fn fork(&self, handle: &PipeHandle) -> Result<PipeHandle, CoreError> {
        let copy = self.buffers.lock().get(&handle.token).cloned().unwrap_or_default();
        let forked = self.allocate(handle.direction)?;
        self.buffers.lock().insert(forked.token, copy);
        Ok(forked)
    }

    fn deallocate(&self, handle: PipeHandle) -> Result<(), CoreError> {
        self.buffers.lock().remove(&handle.token);
        Ok(())
    }
}

/// A `ServletLoader` that hands back a fixed single-input, single-output
/// servlet shape regardless of `argv`, for tests that only care about
/// graph wiring and scheduling, not servlet diversity.
pub struct StubLoader;

impl ServletLoader for StubLoader {
    fn load(&self, argv: &[String]) -> Result<LoadedServlet, CoreError> {
        let mut pdt = Pdt::new();
        pdt.insert("in", PipeFlags::INPUT, "$T")?;
        pdt.insert("out", PipeFlags::OUTPUT, "$T")?;
        let sig_null = pdt.insert("__sig_null", PipeFlags::OUTPUT, "plumber/std/Signal")?;
        let sig_error = pdt.insert("__sig_error", PipeFlags::OUTPUT, "plumber/std/Signal")?;
        Ok(LoadedServlet {
            pdt,
            signals: SignalPipes { sig_null, sig_error },
            description: format!("stub({})", argv.join(" ")),
            version: 1,
        })
    }
}

/// An in-process `EventPoll`: `poll_wait` returns whatever was queued by
/// `poll_add`/a manual `push_ready`, rather than watching real file
/// descriptors. Enough to exercise `EventLoop`/`Scheduler` wiring in tests
/// without a kernel-backed poller.
#[derive(Default)]
pub struct InProcessPoll {
    watched: std::collections::HashSet<u64>,
    ready: VecDeque<PollEvent>,
}

impl InProcessPoll {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a readiness event for `poll_wait`/`poll_take_result` to hand
    /// back, as if the kernel had reported it.
    pub fn push_ready(&mut self, event: PollEvent) {
        self.ready.push_back(event);
    }
}

impl EventPoll for InProcessPoll {
    fn poll_new(&mut self, _max_events: usize) -> Result<(), CoreError> {
        Ok(())
    }

    fn poll_add(&mut self, token: u64, _direction: Direction) -> Result<(), CoreError> {
        self.watched.insert(token);
        Ok(())
    }

    fn poll_modify(&mut self, token: u64, _direction: Direction) -> Result<(), CoreError> {
        self.watched.insert(token);
        Ok(())
    }

    fn poll_del(&mut self, token: u64) -> Result<(), CoreError> {
        self.watched.remove(&token);
        Ok(())
    }

    fn poll_wait(&mut self, _timeout_ms: Option<u64>) -> Result<Vec<PollEvent>, CoreError> {
        Ok(self.ready.drain(..).collect())
    }

    fn poll_take_result(&mut self) -> Option<PollEvent> {
        self.ready.pop_front()
    }

    fn user_event_consume(&mut self) -> Result<(), CoreError> {
        Ok(())
    }
}
