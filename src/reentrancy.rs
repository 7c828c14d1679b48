//! Reentrancy depth and deferred error reporting
//!
//! A reflected host function may call back into the interpreter while an
//! outer protected call is still running. Errors raised at that point are
//! queued instead of reported; the call shim drains the queue once the
//! outermost host call returns and the depth is back at zero.
//!
//! ```text
//!   Idle (depth 0) ──enter──▶ Nested (depth n) ──leave, n-1 > 0──▶ Nested
//!        ▲                                        │
//!        └──────────── leave, depth 0: drain ◀────┘
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

/// Per-bridge call depth plus FIFO queue of deferred error messages.
#[derive(Debug, Default)]
pub struct CallDepth {
    depth: Cell<usize>,
    pending: RefCell<VecDeque<String>>,
}

impl CallDepth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    pub fn is_nested(&self) -> bool {
        self.depth.get() > 0
    }

    /// Enter a host call. The depth drops again when the guard is dropped,
    /// including on early return.
    pub fn enter(&self) -> DepthGuard<'_> {
        self.depth.set(self.depth.get() + 1);
        DepthGuard { owner: self }
    }

    /// Queue an error for reporting once the depth returns to zero.
    pub fn defer(&self, message: impl Into<String>) {
        self.pending.borrow_mut().push_back(message.into());
    }

    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Take every queued error in arrival order.
    ///
    /// Returns nothing while still nested: the queue is only released at
    /// depth zero.
    pub fn drain(&self) -> Vec<String> {
        if self.is_nested() {
            return Vec::new();
        }
        self.pending.borrow_mut().drain(..).collect()
    }

    /// Drop all state, used when the interpreter is torn down.
    pub fn reset(&self) {
        self.depth.set(0);
        self.pending.borrow_mut().clear();
    }
}

/// Scope of one host call; see [`CallDepth::enter`].
#[must_use = "the depth is released when the guard drops"]
pub struct DepthGuard<'a> {
    owner: &'a CallDepth,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.owner
            .depth
            .set(self.owner.depth.get().saturating_sub(1));
    }
}
