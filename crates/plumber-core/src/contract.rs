//! Cancellation, deadline and budget primitives shared by every component
//! that takes part in a request: `Task`, `Scheduler`, `RequestLocalScope`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use crate::error::BudgetKind;

/// Cooperative cancellation flag, shared by `Arc` so every task derived
/// from a request observes the same cancellation.
#[derive(Clone, Debug)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Marks the token cancelled. Returns `true` only the first time this
    /// succeeds, so callers can tell whether they are the one that should
    /// drive the cancellation cascade.
    pub fn cancel(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// A derived token sharing the same underlying flag, for propagating
    /// cancellation down the critical-node cluster.
    pub fn child(&self) -> Self {
        self.clone()
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Absolute deadline expressed against `Instant`, so it survives being
/// passed across worker threads within the same process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub const fn none() -> Self {
        Self { at: None }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    pub fn with_timeout(now: Instant, timeout: Duration) -> Self {
        Self::at(now + timeout)
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.at, Some(deadline) if now >= deadline)
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::none()
    }
}

/// A single resource budget (pipe count, task count, time, memory). The
/// scheduler checks budgets before admitting new tasks and surfaces
/// `ErrorCategory::ResourceExhausted` when one is spent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Budget {
    kind: BudgetKind,
    remaining: Option<u64>,
}

impl Budget {
    pub fn unbounded(kind: BudgetKind) -> Self {
        Self {
            kind,
            remaining: None,
        }
    }

    pub fn limited(kind: BudgetKind, amount: u64) -> Self {
        Self {
            kind,
            remaining: Some(amount),
        }
    }

    pub fn kind(&self) -> BudgetKind {
        self.kind
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Spends `amount` from the budget; returns `false` (without going
    /// negative) once the remaining amount would be exceeded.
    pub fn spend(&mut self, amount: u64) -> bool {
        match self.remaining {
            None => true,
            Some(r) if r >= amount => {
                self.remaining = Some(r - amount);
                true
            }
            Some(_) => false,
        }
    }
}

#[derive(Debug)]
struct CallContextInner {
    cancellation: Cancellation,
    deadline: Deadline,
    budgets: Vec<Budget>,
}

/// Carried through every scheduler/task API: the cancellation/deadline/
/// budget triple for one request.
#[derive(Clone, Debug)]
pub struct CallContext {
    inner: Arc<CallContextInner>,
}

impl CallContext {
    pub fn builder() -> CallContextBuilder {
        CallContextBuilder::default()
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.inner.cancellation
    }

    pub fn deadline(&self) -> Deadline {
        self.inner.deadline
    }

    pub fn budget(&self, kind: BudgetKind) -> Option<&Budget> {
        self.inner.budgets.iter().find(|b| b.kind() == kind)
    }

    pub fn budgets(&self) -> impl Iterator<Item = &Budget> {
        self.inner.budgets.iter()
    }

    /// Zero-copy read-only view, for hot paths (`Task::pipe_ready`,
    /// `Scheduler` dispatch) that only need to inspect state rather than
    /// clone the whole `Arc`.
    pub fn view(&self) -> Context<'_> {
        Context::from(self)
    }
}

/// Read-only view over a `CallContext`, cheap to pass by value.
#[derive(Clone, Copy, Debug)]
pub struct Context<'a> {
    cancellation: &'a Cancellation,
    deadline: Deadline,
    budgets: &'a [Budget],
}

impl<'a> Context<'a> {
    pub fn cancellation(&self) -> &'a Cancellation {
        self.cancellation
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn budget(&self, kind: BudgetKind) -> Option<&'a Budget> {
        self.budgets.iter().find(|b| b.kind() == kind)
    }

    pub fn budgets(&self) -> &'a [Budget] {
        self.budgets
    }
}

impl<'a> From<&'a CallContext> for Context<'a> {
    fn from(ctx: &'a CallContext) -> Self {
        Context {
            cancellation: &ctx.inner.cancellation,
            deadline: ctx.inner.deadline,
            budgets: &ctx.inner.budgets,
        }
    }
}

pub struct CallContextBuilder {
    cancellation: Cancellation,
    deadline: Deadline,
    budgets: Vec<Budget>,
}

impl Default for CallContextBuilder {
    fn default() -> Self {
        Self {
            cancellation: Cancellation::new(),
            deadline: Deadline::none(),
            budgets: Vec::new(),
        }
    }
}

impl CallContextBuilder {
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn add_budget(mut self, budget: Budget) -> Self {
        self.budgets.push(budget);
        self
    }

    pub fn build(self) -> CallContext {
        CallContext {
            inner: Arc::new(CallContextInner {
                cancellation: self.cancellation,
                deadline: self.deadline,
                budgets: self.budgets,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reports_first_caller_only() {
        let token = Cancellation::new();
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn budget_spend_never_goes_negative() {
        let mut budget = Budget::limited(BudgetKind::TaskCount, 2);
        assert!(budget.spend(1));
        assert!(!budget.spend(5));
        assert!(budget.spend(1));
        assert!(budget.is_exhausted());
    }

    #[test]
    fn context_view_shares_cancellation_state() {
        let ctx = CallContext::builder().build();
        let view = ctx.view();
        assert!(!view.cancellation().is_cancelled());
        ctx.cancellation().cancel();
        assert!(view.cancellation().is_cancelled());
    }
}
