//! Object-safe event-readiness polling trait. Grounded on *origin:
//! include/os/event.h*'s `os_event_*` family. No concrete epoll/kqueue
//! binding is provided: that would require `unsafe` syscalls, which this
//! crate's `#![deny(unsafe_code)]` rules out (spec.md Non-goals). Only the
//! in-process `test_stubs` implementation is shipped; a real binding is a
//! downstream crate's job.

use crate::error::CoreError;
use crate::pipe::Direction;

/// One readiness event returned by `poll_wait`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollEvent {
    pub token: u64,
    pub direction: Direction,
    /// Set when the peer closed its end; distinct from ordinary readiness.
    pub closed: bool,
}

/// Implemented by whatever readiness-notification backend an `EventLoop`
/// is configured with. Kept object-safe so `EventLoop` can hold a
/// `Box<dyn EventPoll>` without a generic parameter, matching the
/// teacher's object-safe-trait convention for pluggable backends.
pub trait EventPoll: Send {
    /// Allocates a fresh poll set. The original's `os_event_poll_new`.
    fn poll_new(&mut self, max_events: usize) -> Result<(), CoreError>;

    fn poll_add(&mut self, token: u64, direction: Direction) -> Result<(), CoreError>;

    /// Changes the direction watched for an already-registered token, e.g.
    /// upgrading `In` to `Bidir` once a write becomes pending.
    fn poll_modify(&mut self, token: u64, direction: Direction) -> Result<(), CoreError>;

    fn poll_del(&mut self, token: u64) -> Result<(), CoreError>;

    /// Blocks up to `timeout_ms` (`None` = forever) for at least one ready
    /// event, returning the events observed.
    fn poll_wait(&mut self, timeout_ms: Option<u64>) -> Result<Vec<PollEvent>, CoreError>;

    /// Drains a single buffered result without blocking, for callers that
    /// already know an event arrived (the scheduler's dispatch loop).
    fn poll_take_result(&mut self) -> Option<PollEvent>;

    /// Wakes a thread parked in `poll_wait` without an I/O event, mirroring
    /// `os_event_user_event_consume`'s manual wakeup path (used for
    /// cooperative shutdown).
    fn user_event_consume(&mut self) -> Result<(), CoreError>;
}
