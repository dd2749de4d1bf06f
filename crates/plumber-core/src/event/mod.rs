//! Event plumbing: readiness polling, the producer/consumer event queue,
//! and the per-transport accept loop that feeds it (spec.md §4.10-§4.12).

mod loop_;
mod poll;
mod queue;

pub use loop_::{AcceptedConnection, EventLoop};
pub use poll::{EventPoll, PollEvent};
pub use queue::{EventQueue, SharedEventQueue};
