//! Event queue: many producers (one per registered module), one consumer
//! (the scheduler thread). Each producer gets its own bounded ring so a
//! slow consumer cannot let one noisy module starve the others; the
//! consumer visits rings round-robin (see `DESIGN.md`'s Open Question
//! resolution: fairness over strict global FIFO).
//!
//! Grounded on *origin: include/itc/equeue.h* (`itc_equeue_*`).

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{codes, CoreError, DomainError, DomainErrorKind, ErrorCategory};
use crate::ids::EqueueToken;

struct Ring<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }
}

struct Inner<T> {
    rings: Vec<Ring<T>>,
    /// Index of the ring to poll first on the next `take`, advanced after
    /// every successful pop to rotate fairly across producers.
    next_ring: usize,
}

/// Bounded multi-producer single-consumer event queue.
pub struct EventQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                rings: Vec::new(),
                next_ring: 0,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Registers a new producer with its own bounded ring, returning the
    /// token it must present to `put`.
    pub fn register_producer(&self, capacity: usize) -> EqueueToken {
        let mut inner = self.inner.lock();
        let sequence = inner.rings.len() as u32;
        inner.rings.push(Ring::new(capacity));
        EqueueToken::module(sequence)
    }

    pub fn scheduler_token(&self) -> EqueueToken {
        EqueueToken::scheduler()
    }

    fn ring_index(token: EqueueToken) -> usize {
        (token.raw() >> 1) as usize
    }

    /// Enqueues `item` for `token`'s ring; fails with `EQUEUE_FULL` if the
    /// ring is at capacity rather than blocking the producer.
    pub fn put(&self, token: EqueueToken, item: T) -> Result<(), CoreError> {
        let mut inner = self.inner.lock();
        let index = Self::ring_index(token);
        let ring = inner
            .rings
            .get_mut(index)
            .ok_or_else(|| unknown_token(token))?;
        if ring.items.len() >= ring.capacity {
            return Err(DomainError::new(
                DomainErrorKind::EventQueue,
                codes::EQUEUE_FULL,
                format!("ring for {token:?} is at capacity {}", ring.capacity),
            )
            .into_core(ErrorCategory::ResourceExhausted(
                crate::error::BudgetKind::PipeCount,
            )));
        }
        ring.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Non-blocking pop, round-robin across rings starting from the ring
    /// after the one last served.
    pub fn try_take(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        Self::try_take_locked(&mut inner)
    }

    fn try_take_locked(inner: &mut Inner<T>) -> Option<T> {
        let n = inner.rings.len();
        if n == 0 {
            return None;
        }
        for step in 0..n {
            let index = (inner.next_ring + step) % n;
            if let Some(item) = inner.rings[index].items.pop_front() {
                inner.next_ring = (index + 1) % n;
                return Some(item);
            }
        }
        None
    }

    /// Blocks until an item is available from any ring.
    pub fn wait(&self) -> T {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = Self::try_take_locked(&mut inner) {
                return item;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    pub fn empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.rings.iter().all(|r| r.items.is_empty())
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_token(token: EqueueToken) -> CoreError {
    DomainError::new(
        DomainErrorKind::EventQueue,
        codes::EQUEUE_UNKNOWN_TOKEN,
        format!("no producer ring registered for {token:?}"),
    )
    .into_core(ErrorCategory::NonRetryable)
}

/// Convenience alias for the shared handle nodes and the scheduler both
/// hold.
pub type SharedEventQueue<T> = Arc<EventQueue<T>>;
