//! Error layering: `CoreError` is the crate-wide return type, `DomainError`
//! tags a failure to the component that raised it, `ImplError` carries an
//! implementation detail (a concrete transport module's I/O failure, say)
//! that the domain layer may choose to expose or swallow.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use crate::sealed::Sealed;

/// Crate-wide result alias; most public APIs return `Result<T>` rather than
/// naming `CoreError` at every call site.
pub type Result<T, E = CoreError> = core::result::Result<T, E>;

/// Object-safe error trait implemented by every error type in this crate,
/// mirroring `std::error::Error` without requiring `std` in theory (kept
/// here, unlike the teacher, because `plumber-core` is `std`-only; see
/// `DESIGN.md` for the no_std departure).
pub trait Error: fmt::Debug + fmt::Display + Sealed {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

impl std::error::Error for CoreError {}
impl std::error::Error for DomainError {}
impl std::error::Error for ImplError {}

/// How a failure should be treated by the scheduler's automated retry /
/// cancel / budget policy (spec.md §7).
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Safe to retry, optionally with a suggested backoff.
    Retryable { backoff: Option<Duration> },
    /// Retrying will not help; the caller must change something first.
    NonRetryable,
    /// A budget (time, memory, pipe count) was exhausted.
    ResourceExhausted(BudgetKind),
    /// The pipe's type expression could not be resolved to a concrete type.
    ProtocolViolation,
    /// The request was cancelled, by the caller or by critical-node
    /// propagation.
    Cancelled,
    /// A deadline elapsed before the operation completed.
    Timeout,
}

/// Mirrors `contract::BudgetKind`; re-exported here to avoid a cyclic
/// module dependency between `error` and `contract`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum BudgetKind {
    Time,
    Memory,
    PipeCount,
    TaskCount,
}

/// Stable `<domain>.<reason>` error codes. Kept as plain string constants
/// rather than an enum so new codes never require a semver bump.
pub mod codes {
    pub const PDT_DUPLICATE_NAME: &str = "pdt.duplicate_name";
    pub const PDT_UNKNOWN_PD: &str = "pdt.unknown_pd";
    pub const STAB_UNKNOWN_SERVLET: &str = "stab.unknown_servlet";
    pub const STAB_OWNER_ALREADY_SET: &str = "stab.owner_already_set";
    pub const STAB_REUSE_FORBIDDEN: &str = "stab.reuse_forbidden";
    pub const TYPE_UNRESOLVED_VARIABLE: &str = "type.unresolved_variable";
    pub const TYPE_CONFLICTING_BINDING: &str = "type.conflicting_binding";
    pub const GRAPH_DANGLING_EDGE: &str = "graph.dangling_edge";
    pub const GRAPH_CYCLE_DETECTED: &str = "graph.cycle_detected";
    pub const GRAPH_NOT_FINALIZED: &str = "graph.not_finalized";
    pub const GRAPH_UNREACHABLE_NODE: &str = "graph.unreachable_node";
    pub const GRAPH_NO_DOWNSTREAM_EDGE: &str = "graph.no_downstream_edge";
    pub const GRAPH_MISSING_INPUT_EDGE: &str = "graph.missing_input_edge";
    pub const TYPE_HOOK_FAILED: &str = "type.hook_failed";
    pub const CNODE_UNKNOWN_NODE: &str = "cnode.unknown_node";
    pub const SCOPE_UNKNOWN_TOKEN: &str = "scope.unknown_token";
    pub const SCOPE_STREAM_CLOSED: &str = "scope.stream_closed";
    pub const PIPE_HANDLE_EXHAUSTED: &str = "pipe.handle_exhausted";
    pub const PIPE_MODULE_NOT_FOUND: &str = "pipe.module_not_found";
    pub const PIPE_WRONG_DIRECTION: &str = "pipe.wrong_direction";
    pub const EQUEUE_FULL: &str = "equeue.full";
    pub const EQUEUE_UNKNOWN_TOKEN: &str = "equeue.unknown_token";
    pub const SCHEDULER_REQUEST_UNKNOWN: &str = "scheduler.request_unknown";
    pub const SCHEDULER_SHUTDOWN: &str = "scheduler.shutdown";
    pub const SCHEDULER_FAN_OUT_REQUIRES_SHADOW: &str = "scheduler.fan_out_requires_shadow";
    pub const ASYNC_TASK_FAILED: &str = "async.task_failed";
    pub const MEMPOOL_EXHAUSTED: &str = "mempool.exhausted";
}

/// The error type returned by nearly every public function in this crate.
#[derive(Clone, Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    category: Option<ErrorCategory>,
    cause: Option<Box<DomainError>>,
}

impl CoreError {
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            category: None,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: DomainError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&DomainError> {
        self.cause.as_deref()
    }

    /// Category used by the scheduler to decide retry/cancel/budget policy.
    /// Falls back to `NonRetryable` when the site that raised the error did
    /// not classify it.
    pub fn category(&self) -> ErrorCategory {
        self.category
            .clone()
            .unwrap_or(ErrorCategory::NonRetryable)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn Error + 'static))
    }
}

/// Which component raised a `DomainError`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum DomainErrorKind {
    Pdt,
    Stab,
    TypeResolution,
    Graph,
    CriticalNode,
    Scope,
    PipeHandle,
    EventQueue,
    Scheduler,
    Async,
    Memory,
}

/// A failure tagged to a component, optionally wrapping an `ImplError` from
/// whatever concrete backend (a `TransportModule`, an `EventPoll`
/// implementation) raised the underlying fault.
#[derive(Clone, Debug)]
pub struct DomainError {
    kind: DomainErrorKind,
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<Box<ImplError>>,
}

impl DomainError {
    pub fn new(
        kind: DomainErrorKind,
        code: &'static str,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: ImplError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn kind(&self) -> DomainErrorKind {
        self.kind
    }

    pub fn into_core(self, category: ErrorCategory) -> CoreError {
        CoreError::new(self.code, self.message.clone())
            .with_category(category)
            .with_cause(self)
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for DomainError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn Error + 'static))
    }
}

/// Implementation-detail error, kept separate from `DomainError` so callers
/// who only care about the domain-level classification are not forced to
/// match on backend-specific variants.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum ImplErrorKind {
    Io,
    Protocol,
    ThreadPanicked,
    Other,
}

#[derive(Clone, Debug)]
pub struct ImplError {
    kind: ImplErrorKind,
    detail: Cow<'static, str>,
}

impl ImplError {
    pub fn new(kind: ImplErrorKind, detail: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> &ImplErrorKind {
        &self.kind
    }
}

impl fmt::Display for ImplError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

impl Error for ImplError {}
