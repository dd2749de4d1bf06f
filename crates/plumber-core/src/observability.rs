//! Structured logging surface. The engine never logs directly through
//! `tracing` macros from deep inside scheduling logic; instead it calls a
//! `Logger` at well-defined points, so embedders can redirect, sample, or
//! silence engine events without patching the scheduler.

use std::sync::Arc;

use crate::ids::{ModuleId, NodeId, RequestId, ServletId};
use crate::sealed::Sealed;

/// Well-defined points at which the engine reports what it is doing.
/// Deliberately narrower than a generic structured-event bus: these are
/// the events spec.md's components name explicitly (task dispatch,
/// cancellation, namespace swap, type resolution failure, loop exit).
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum EngineEvent {
    TaskDispatched {
        request: RequestId,
        node: NodeId,
    },
    TaskCancelled {
        request: RequestId,
        node: NodeId,
        critical: bool,
    },
    NamespaceSwapped {
        previous_generation: u64,
        new_generation: u64,
    },
    TypeResolutionFailed {
        pd_name: String,
        reason: String,
    },
    RequestStarted {
        request: RequestId,
    },
    RequestCompleted {
        request: RequestId,
    },
    EventLoopExited {
        module: ModuleId,
    },
    ServletLoaded {
        servlet: ServletId,
    },
}

/// Object-safe logging sink. Default production implementation bridges to
/// `tracing`; tests use `test_stubs::RecordingLogger`.
pub trait Logger: Send + Sync + Sealed {
    fn log(&self, event: &EngineEvent);
}

/// Bridges `EngineEvent`s to `tracing::event!` at an appropriate level per
/// variant (cancellation/failure at `warn`, everything else at `debug`).
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, event: &EngineEvent) {
        match event {
            EngineEvent::TaskDispatched { request, node } => {
                tracing::debug!(?request, ?node, "task dispatched");
            }
            EngineEvent::TaskCancelled {
                request,
                node,
                critical,
            } => {
                tracing::warn!(?request, ?node, critical, "task cancelled");
            }
            EngineEvent::NamespaceSwapped {
                previous_generation,
                new_generation,
            } => {
                tracing::info!(previous_generation, new_generation, "servlet namespace swapped");
            }
            EngineEvent::TypeResolutionFailed { pd_name, reason } => {
                tracing::warn!(pd_name, reason, "type resolution failed");
            }
            EngineEvent::RequestStarted { request } => {
                tracing::debug!(?request, "request started");
            }
            EngineEvent::RequestCompleted { request } => {
                tracing::debug!(?request, "request completed");
            }
            EngineEvent::EventLoopExited { module } => {
                tracing::info!(?module, "event loop exited");
            }
            EngineEvent::ServletLoaded { servlet } => {
                tracing::debug!(?servlet, "servlet loaded");
            }
        }
    }
}

/// Shared handle type used by components that need to emit events without
/// owning a concrete logger type.
pub type SharedLogger = Arc<dyn Logger>;

pub fn default_logger() -> SharedLogger {
    Arc::new(TracingLogger)
}
