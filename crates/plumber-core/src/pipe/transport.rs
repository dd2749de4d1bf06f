//! `TransportModule`: the object-safe abstraction a concrete transport
//! (TCP, memory pipe, ...) implements. Concrete transports are themselves
//! out of scope for this crate (spec.md §1); what lives here is the
//! contract they must satisfy, grounded on the object-safe
//! trait-plus-adapter pattern used throughout the teacher's transport
//! layer (`DynServerTransport` / `ServerTransportObject`).

use crate::error::CoreError;
use crate::ids::ModuleId;

/// Which directions a pipe handle may be opened in. The original collapses
/// this into readable/writable; the full four-way enum recovers the
/// distinction `poll_modify` needs between "upgrade to bidirectional" and
/// a fresh add (*origin: include/os/event.h*, `OS_EVENT_KERNEL_EVENT_IN/
/// OUT/CONNECT`, plus spec.md §4.8's `BIDIR`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Connect,
    Bidir,
}

/// An opaque handle to one end of a pipe, as handed out by a
/// `TransportModule`. Concrete transports define what lives behind the
/// handle; this crate only needs to move it around and call back into the
/// module that produced it.
///
/// `Copy`, like the original's plain integer handles: nothing here enforces
/// linear ownership at the type level, so a caller can hand the same
/// descriptor to more than one place (the scheduler routing a fan-out pipe
/// to several downstream edges, say) without going through `fork`. Actually
/// releasing the underlying resource still requires an explicit
/// `TransportModule::deallocate` call; `Copy` only means forgetting to
/// route a copy doesn't leak it by itself, since the original handle lives
/// on too.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipeHandle {
    pub module: ModuleId,
    pub token: u64,
    pub direction: Direction,
}

/// Implemented by a concrete transport module. `accept` is only
/// implemented by modules that run an event loop (the original's
/// `ITC_MODULE_FLAGS_EVENT_LOOP`); others return
/// `codes::PIPE_WRONG_DIRECTION` if called.
pub trait TransportModule: Send + Sync {
    /// Dense id for internal dispatch.
    fn module_id(&self) -> ModuleId;

    /// Human-readable instance address, e.g. `pipe.tcp.port_80`, recovering
    /// the original's dual module-path/module-id addressing (*origin:
    /// include/itc/modtab.h*).
    fn module_path(&self) -> &str;

    fn allocate(&self, direction: Direction) -> Result<PipeHandle, CoreError>;

    /// Blocks until an incoming connection produces a fresh (input, output)
    /// pipe handle pair. Only meaningful for modules that accept external
    /// connections.
    fn accept(&self) -> Result<(PipeHandle, PipeHandle), CoreError>;

    fn read(&self, handle: &PipeHandle, buffer: &mut [u8]) -> Result<usize, CoreError>;

    fn write(&self, handle: &PipeHandle, data: &[u8]) -> Result<usize, CoreError>;

    /// Writes an RLS scope token reference rather than inline bytes, for
    /// zero-copy forwarding of a scope-resident buffer between nodes.
    fn write_scope_token(
        &self,
        handle: &PipeHandle,
        token: crate::ids::ScopeToken,
    ) -> Result<(), CoreError>;

    fn eof(&self, handle: &PipeHandle) -> Result<bool, CoreError>;

    /// Out-of-band control call, e.g. for a transport-specific knob the
    /// generic pipe API does not model.
    fn cntl(&self, handle: &PipeHandle, opcode: u32, arg: i64) -> Result<i64, CoreError>;

    /// Forks a shadow copy of an input handle without transferring
    /// ownership, for the scheduler's shadow-pipe exemption
    /// (`sched_task_output_shadow`).
    fn fork(&self, handle: &PipeHandle) -> Result<PipeHandle, CoreError>;

    fn deallocate(&self, handle: PipeHandle) -> Result<(), CoreError>;
}
