//! Pipe-handle runtime: the registry that maps a `ModuleId` to the
//! `TransportModule` instance that owns it, and the single entry point
//! nodes use to move bytes through a pipe without knowing which transport
//! backs it. Grounded on *origin: include/itc/modtab.h*'s module table
//! (`itc_modtab_get_module`/`itc_modtab_get_handle_type`) plus the
//! teacher's object-safe-trait-plus-adapter convention
//! (`transport/traits/object.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{codes, CoreError, DomainError, DomainErrorKind, ErrorCategory};
use crate::ids::{ModuleId, ScopeToken};

use super::transport::{Direction, PipeHandle, TransportModule};

/// Registry of live transport modules, keyed by both dense id and path so
/// lookups work from either side of the dual addressing scheme.
#[derive(Default)]
pub struct PipeHandleRuntime {
    by_id: RwLock<HashMap<ModuleId, Arc<dyn TransportModule>>>,
    by_path: RwLock<HashMap<String, ModuleId>>,
}

impl PipeHandleRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transport module under its own id and path. Replaces any
    /// previous registration at the same id, mirroring `itc_modtab_insmod`'s
    /// last-writer-wins semantics.
    pub fn register(&self, module: Arc<dyn TransportModule>) {
        let id = module.module_id();
        let path = module.module_path().to_string();
        self.by_path.write().insert(path, id);
        self.by_id.write().insert(id, module);
    }

    pub fn unregister(&self, id: ModuleId) {
        if let Some(module) = self.by_id.write().remove(&id) {
            self.by_path.write().remove(module.module_path());
        }
    }

    pub fn lookup(&self, id: ModuleId) -> Result<Arc<dyn TransportModule>, CoreError> {
        self.by_id
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| module_not_found(id))
    }

    pub fn resolve_path(&self, path: &str) -> Result<Arc<dyn TransportModule>, CoreError> {
        let id = *self
            .by_path
            .read()
            .get(path)
            .ok_or_else(|| module_not_found_by_path(path))?;
        self.lookup(id)
    }

    pub fn allocate(&self, module: ModuleId, direction: Direction) -> Result<PipeHandle, CoreError> {
        self.lookup(module)?.allocate(direction)
    }

    pub fn accept(&self, module: ModuleId) -> Result<(PipeHandle, PipeHandle), CoreError> {
        self.lookup(module)?.accept()
    }

    pub fn read(&self, handle: &PipeHandle, buffer: &mut [u8]) -> Result<usize, CoreError> {
        self.lookup(handle.module)?.read(handle, buffer)
    }

    pub fn write(&self, handle: &PipeHandle, data: &[u8]) -> Result<usize, CoreError> {
        require_writable(handle)?;
        self.lookup(handle.module)?.write(handle, data)
    }

    pub fn write_scope_token(&self, handle: &PipeHandle, token: ScopeToken) -> Result<(), CoreError> {
        require_writable(handle)?;
        self.lookup(handle.module)?.write_scope_token(handle, token)
    }

    pub fn eof(&self, handle: &PipeHandle) -> Result<bool, CoreError> {
        self.lookup(handle.module)?.eof(handle)
    }

    pub fn cntl(&self, handle: &PipeHandle, opcode: u32, arg: i64) -> Result<i64, CoreError> {
        self.lookup(handle.module)?.cntl(handle, opcode, arg)
    }

    pub fn fork(&self, handle: &PipeHandle) -> Result<PipeHandle, CoreError> {
        self.lookup(handle.module)?.fork(handle)
    }

    pub fn deallocate(&self, handle: PipeHandle) -> Result<(), CoreError> {
        self.lookup(handle.module)?.deallocate(handle)
    }
}

fn require_writable(handle: &PipeHandle) -> Result<(), CoreError> {
    match handle.direction {
        Direction::Out | Direction::Bidir => Ok(()),
        Direction::In | Direction::Connect => Err(DomainError::new(
            DomainErrorKind::PipeHandle,
            codes::PIPE_WRONG_DIRECTION,
            format!("handle opened as {:?} cannot be written to", handle.direction),
        )
        .into_core(ErrorCategory::NonRetryable)),
    }
}

fn module_not_found(id: ModuleId) -> CoreError {
    DomainError::new(
        DomainErrorKind::PipeHandle,
        codes::PIPE_MODULE_NOT_FOUND,
        format!("no transport module registered for {id:?}"),
    )
    .into_core(ErrorCategory::NonRetryable)
}

fn module_not_found_by_path(path: &str) -> CoreError {
    DomainError::new(
        DomainErrorKind::PipeHandle,
        codes::PIPE_MODULE_NOT_FOUND,
        format!("no transport module registered at path '{path}'"),
    )
    .into_core(ErrorCategory::NonRetryable)
}
