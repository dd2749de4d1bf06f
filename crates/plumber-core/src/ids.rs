//! Dense newtype identifiers used throughout the crate. Kept as small
//! `Copy` wrappers around integers rather than `Arc<str>`/`String` handles,
//! matching the original's `runtime_api_pipe_id_t` / `itc_module_type_t`
//! shape (plain integers looked up in side tables) and the teacher's
//! `PipelineHandleId` bit-packing convention.

use std::fmt;

/// Pipe descriptor, scoped to a single servlet's `Pdt`. Negative values in
/// the original signalled an error; here that is represented by `Result`
/// instead, so the id itself is always valid.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PipeId(u32);

impl PipeId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PipeId({})", self.0)
    }
}

/// Node within a `ServiceGraph`, corresponds to `sched_service_node_id_t`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Servlet table entry, corresponds to `runtime_stab_entry_t`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServletId(u32);

impl ServletId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ServletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServletId({})", self.0)
    }
}

/// Module instance id, corresponds to `itc_module_type_t`. Every module
/// instance additionally carries a human-readable `module_path` (see
/// `pipe::TransportModule::module_path`) recovering the original's dual
/// addressing scheme.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(u32);

impl ModuleId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", self.0)
    }
}

/// Request identifier, corresponds to `sched_task_request_t`. Monotonic,
/// assigned by `Task::new_request`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

/// RLS pointer token, corresponds to `runtime_api_scope_token_t`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeToken(u32);

impl ScopeToken {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ScopeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeToken({})", self.0)
    }
}

/// Event-queue thread token: either a module's producer token or the
/// single scheduler/consumer token, corresponds to `itc_equeue_token_t`.
/// Low bit distinguishes the two kinds, matching the teacher's
/// `PipelineHandleId` direction-in-low-bit packing.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EqueueToken(u32);

impl EqueueToken {
    const SCHEDULER_BIT: u32 = 1;

    pub(crate) const fn module(sequence: u32) -> Self {
        Self(sequence << 1)
    }

    pub(crate) const fn scheduler() -> Self {
        Self(Self::SCHEDULER_BIT)
    }

    pub const fn is_scheduler(self) -> bool {
        self.0 & Self::SCHEDULER_BIT != 0
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for EqueueToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EqueueToken({}, scheduler={})", self.0, self.is_scheduler())
    }
}
