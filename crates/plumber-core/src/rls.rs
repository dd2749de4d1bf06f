//! Request-Local Scope: per-request memory shared between the nodes that
//! participate in that request, with copy-on-write semantics for mutation
//! and a byte-stream view for servlets that want to consume a scope
//! pointer incrementally rather than all at once.
//!
//! Grounded on *origin: include/sched/rscope.h* (`sched_rscope_*`). Scope
//! disposal is synchronous with the owning task's completion (see
//! `DESIGN.md`'s Open Question resolution) rather than deferred to a
//! garbage collector.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{codes, CoreError, DomainError, DomainErrorKind, ErrorCategory};
use crate::ids::ScopeToken;

/// An entity added to a scope: owned bytes plus an optional streaming
/// reader, matching `runtime_api_scope_entity_t`'s pointer-plus-open-hook
/// shape.
pub enum ScopeEntity {
    Bytes(Arc<Vec<u8>>),
    Stream(Arc<dyn StreamSource>),
}

/// Implemented by a scope entity that wants to expose itself as a byte
/// stream rather than a single buffer (large or generated payloads).
pub trait StreamSource: Send + Sync {
    fn open(&self) -> Box<dyn ScopeStream>;
}

/// An open read cursor over a streamed scope entity.
pub trait ScopeStream: Send {
    fn read(&mut self, buffer: &mut [u8]) -> usize;
    fn eos(&self) -> bool;
}

/// One entry's bookkeeping alongside its owned entity: `committed` starts
/// false per *rscope.h*'s `refcount = 0, uncommitted` and flips exactly
/// once, via `commit`, when the entity's token gets written into pipe
/// data the downstream can see.
struct ScopeRecord {
    entity: ScopeEntity,
    committed: bool,
}

/// A request-local scope. One instance per in-flight request; all nodes
/// participating in that request share it through the `Task` that carries
/// a clone of this handle.
#[derive(Clone)]
pub struct RequestLocalScope {
    entries: Arc<DashMap<ScopeToken, ScopeRecord>>,
    next_token: Arc<std::sync::atomic::AtomicU32>,
    streams: Arc<Mutex<Vec<(u32, Box<dyn ScopeStream>)>>>,
}

impl RequestLocalScope {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_token: Arc::new(std::sync::atomic::AtomicU32::new(0)),
            streams: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn alloc_token(&self) -> ScopeToken {
        ScopeToken::new(
            self.next_token
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst),
        )
    }

    /// Adds a new entity, taking ownership of its bytes; returns the token
    /// assigned to it. Starts out uncommitted.
    pub fn add(&self, entity: ScopeEntity) -> ScopeToken {
        let token = self.alloc_token();
        self.entries.insert(
            token,
            ScopeRecord {
                entity,
                committed: false,
            },
        );
        token
    }

    /// Marks an entry published into pipe data: the scope now owns its
    /// disposal unconditionally, rather than it being eligible for
    /// `dispose_uncommitted` cleanup at request end. Idempotent; errors if
    /// the token was never added (or was already disposed).
    pub fn commit(&self, token: ScopeToken) -> Result<(), CoreError> {
        let mut entry = self.entries.get_mut(&token).ok_or_else(|| unknown_token(token))?;
        entry.committed = true;
        Ok(())
    }

    pub fn is_committed(&self, token: ScopeToken) -> Result<bool, CoreError> {
        Ok(self.entries.get(&token).ok_or_else(|| unknown_token(token))?.committed)
    }

    /// Drops every entry that was never `commit`ted. Called once a request
    /// is ending (completed or cancelled): an uncommitted entry never made
    /// it into pipe data anyone downstream can still reach, so nothing
    /// needs it kept alive until the whole scope drops. Committed entries
    /// are left untouched — their `free` runs on ordinary scope
    /// destruction alongside every other still-live `Arc` clone.
    pub fn dispose_uncommitted(&self) {
        self.entries.retain(|_, record| record.committed);
    }

    /// Copy-on-write clone of an existing entry: produces a new token
    /// holding an independent copy, so the caller can mutate it without
    /// affecting readers still holding the original token. The copy starts
    /// uncommitted, same as any other freshly `add`ed entry.
    pub fn copy(&self, token: ScopeToken) -> Result<ScopeToken, CoreError> {
        let entry = self.entries.get(&token).ok_or_else(|| unknown_token(token))?;
        let copied = match &entry.entity {
            ScopeEntity::Bytes(bytes) => ScopeEntity::Bytes(Arc::new((**bytes).clone())),
            ScopeEntity::Stream(source) => ScopeEntity::Stream(source.clone()),
        };
        drop(entry);
        Ok(self.add(copied))
    }

    /// Returns the bytes for a token, if the entity is a plain buffer
    /// rather than a stream.
    pub fn get(&self, token: ScopeToken) -> Result<Arc<Vec<u8>>, CoreError> {
        match &self.entries.get(&token).ok_or_else(|| unknown_token(token))?.entity {
            ScopeEntity::Bytes(bytes) => Ok(bytes.clone()),
            ScopeEntity::Stream(_) => Err(DomainError::new(
                DomainErrorKind::Scope,
                codes::SCOPE_UNKNOWN_TOKEN,
                "token holds a stream entity, not bytes",
            )
            .into_core(ErrorCategory::NonRetryable)),
        }
    }

    /// Opens a byte-stream cursor for `token`, returning a handle used by
    /// `stream_read`/`stream_eos`/`stream_close`.
    pub fn stream_open(&self, token: ScopeToken) -> Result<u32, CoreError> {
        let entry = self.entries.get(&token).ok_or_else(|| unknown_token(token))?;
        let stream: Box<dyn ScopeStream> = match &entry.entity {
            ScopeEntity::Stream(source) => source.open(),
            ScopeEntity::Bytes(bytes) => Box::new(BufferStream {
                bytes: bytes.clone(),
                pos: 0,
            }),
        };
        drop(entry);
        let mut streams = self.streams.lock();
        let handle = streams.len() as u32;
        streams.push((handle, stream));
        Ok(handle)
    }

    pub fn stream_read(&self, handle: u32, buffer: &mut [u8]) -> Result<usize, CoreError> {
        let mut streams = self.streams.lock();
        let (_, stream) = streams
            .iter_mut()
            .find(|(h, _)| *h == handle)
            .ok_or_else(|| stream_closed())?;
        Ok(stream.read(buffer))
    }

    pub fn stream_eos(&self, handle: u32) -> Result<bool, CoreError> {
        let streams = self.streams.lock();
        let (_, stream) = streams
            .iter()
            .find(|(h, _)| *h == handle)
            .ok_or_else(|| stream_closed())?;
        Ok(stream.eos())
    }

    pub fn stream_close(&self, handle: u32) -> Result<(), CoreError> {
        let mut streams = self.streams.lock();
        let before = streams.len();
        streams.retain(|(h, _)| *h != handle);
        if streams.len() == before {
            return Err(stream_closed());
        }
        Ok(())
    }
}

impl Default for RequestLocalScope {
    fn default() -> Self {
        Self::new()
    }
}

struct BufferStream {
    bytes: Arc<Vec<u8>>,
    pos: usize,
}

impl ScopeStream for BufferStream {
    fn read(&mut self, buffer: &mut [u8]) -> usize {
        let remaining = &self.bytes[self.pos..];
        let n = remaining.len().min(buffer.len());
        buffer[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        n
    }

    fn eos(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

fn unknown_token(token: ScopeToken) -> CoreError {
    DomainError::new(
        DomainErrorKind::Scope,
        codes::SCOPE_UNKNOWN_TOKEN,
        format!("no such scope token: {token:?}"),
    )
    .into_core(ErrorCategory::NonRetryable)
}

fn stream_closed() -> CoreError {
    DomainError::new(
        DomainErrorKind::Scope,
        codes::SCOPE_STREAM_CLOSED,
        "stream handle is closed or unknown",
    )
    .into_core(ErrorCategory::NonRetryable)
}
