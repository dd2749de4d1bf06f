//! Pipe Descriptor Table: the per-servlet table of named, typed pipes a
//! servlet's `init` registers. Looked up by name when the service graph is
//! built and by id on every pipe operation thereafter.
//!
//! Not on the scheduler's hot path — insertion happens once per servlet
//! instantiation, lookups happen during graph construction and type
//! resolution, never per-message.

use crate::error::{codes, CoreError, DomainError, DomainErrorKind, ErrorCategory};
use crate::ids::PipeId;

/// Mirrors `runtime_api_pipe_flags_t`. Hand-rolled rather than pulled from
/// a bitflags crate — the original is a plain bitfield and the set of
/// flags this crate needs is small and stable.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PipeFlags(u32);

impl PipeFlags {
    pub const INPUT: PipeFlags = PipeFlags(0b0000_0001);
    pub const OUTPUT: PipeFlags = PipeFlags(0b0000_0010);
    pub const ASYNC: PipeFlags = PipeFlags(0b0000_0100);
    pub const SHADOW: PipeFlags = PipeFlags(0b0000_1000);
    pub const PERSIST: PipeFlags = PipeFlags(0b0001_0000);

    pub const fn contains(self, other: PipeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: PipeFlags) -> PipeFlags {
        PipeFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for PipeFlags {
    type Output = PipeFlags;
    fn bitor(self, rhs: PipeFlags) -> PipeFlags {
        self.union(rhs)
    }
}

/// A function consulted by the type resolver when a pipe's type depends on
/// runtime state the static type expression cannot express (the original's
/// `runtime_api_pipe_type_callback_t`).
pub type TypeHook = std::sync::Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Clone)]
struct PdtEntry {
    name: String,
    flags: PipeFlags,
    type_expr: String,
    type_hook: Option<TypeHook>,
}

impl std::fmt::Debug for PdtEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdtEntry")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("type_expr", &self.type_expr)
            .field("type_hook", &self.type_hook.is_some())
            .finish()
    }
}

/// Pipe descriptor table for one servlet instance.
#[derive(Clone, Default, Debug)]
pub struct Pdt {
    entries: Vec<PdtEntry>,
}

impl Pdt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new named pipe. Names are unique within a `Pdt`.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        flags: PipeFlags,
        type_expr: impl Into<String>,
    ) -> Result<PipeId, CoreError> {
        let name = name.into();
        if self.entries.iter().any(|e| e.name == name) {
            return Err(DomainError::new(
                DomainErrorKind::Pdt,
                codes::PDT_DUPLICATE_NAME,
                format!("pipe name already registered: {name}"),
            )
            .into_core(ErrorCategory::NonRetryable));
        }
        let id = PipeId::new(self.entries.len() as u32);
        self.entries.push(PdtEntry {
            name,
            flags,
            type_expr: type_expr.into(),
            type_hook: None,
        });
        Ok(id)
    }

    pub fn get_pd_by_name(&self, name: &str) -> Option<PipeId> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .map(|idx| PipeId::new(idx as u32))
    }

    fn entry(&self, pid: PipeId) -> Result<&PdtEntry, CoreError> {
        self.entries.get(pid.raw() as usize).ok_or_else(|| {
            DomainError::new(
                DomainErrorKind::Pdt,
                codes::PDT_UNKNOWN_PD,
                format!("no such pipe descriptor: {pid:?}"),
            )
            .into_core(ErrorCategory::NonRetryable)
        })
    }

    pub fn flags(&self, pid: PipeId) -> Result<PipeFlags, CoreError> {
        self.entry(pid).map(|e| e.flags)
    }

    pub fn name(&self, pid: PipeId) -> Result<&str, CoreError> {
        self.entry(pid).map(|e| e.name.as_str())
    }

    pub fn type_expr(&self, pid: PipeId) -> Result<&str, CoreError> {
        self.entry(pid).map(|e| e.type_expr.as_str())
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn input_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.flags.contains(PipeFlags::INPUT))
            .count()
    }

    pub fn output_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.flags.contains(PipeFlags::OUTPUT))
            .count()
    }

    pub fn set_type_hook(&mut self, pid: PipeId, hook: TypeHook) -> Result<(), CoreError> {
        let entries_len = self.entries.len();
        let entry = self
            .entries
            .get_mut(pid.raw() as usize)
            .ok_or_else(|| {
                DomainError::new(
                    DomainErrorKind::Pdt,
                    codes::PDT_UNKNOWN_PD,
                    format!("no such pipe descriptor ({} entries)", entries_len),
                )
                .into_core(ErrorCategory::NonRetryable)
            })?;
        entry.type_hook = Some(hook);
        Ok(())
    }

    pub fn type_hook(&self, pid: PipeId) -> Result<Option<TypeHook>, CoreError> {
        self.entry(pid).map(|e| e.type_hook.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = PipeId> + '_ {
        (0..self.entries.len()).map(|i| PipeId::new(i as u32))
    }
}
