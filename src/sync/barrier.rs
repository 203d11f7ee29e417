//! Completion barrier: counts outstanding units of work and releases waiters
//! once every registered unit has reported done.
//!
//! A barrier is a single-use-per-wave rendezvous. `add` registers units before
//! they are spawned, each unit calls `done` exactly once, and `wait` blocks
//! until the count drains to zero. Mismatched `add`/`done` calls are caller
//! bugs and panic instead of wrapping.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;

struct State {
    pending: usize,
    // Bumped every time `pending` drains to zero so waiters of a finished wave
    // are not held back by the next wave's `add`.
    generation: u64,
}

struct Inner {
    state: Mutex<State>,
    drained: Condvar,
}

/// Counter of outstanding work units with a blocking `wait`.
///
/// Cloning is cheap and yields a handle to the same counter.
#[derive(Clone)]
pub struct CompletionBarrier {
    inner: Arc<Inner>,
}

impl CompletionBarrier {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    pending: 0,
                    generation: 0,
                }),
                drained: Condvar::new(),
            }),
        }
    }

    /// Register `n` more units. Must happen before any of them is spawned.
    ///
    /// # Panics
    ///
    /// If the counter would overflow.
    pub fn add(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut state = self.inner.state.lock();
        match state.pending.checked_add(n) {
            Some(pending) => state.pending = pending,
            None => {
                drop(state);
                panic!("completion barrier overflow: add({}) exceeds usize::MAX", n);
            }
        }
    }

    /// Report one unit as finished, waking every waiter when the count hits zero.
    ///
    /// # Panics
    ///
    /// If called more times than units were registered.
    pub fn done(&self) {
        let mut state = self.inner.state.lock();
        if state.pending == 0 {
            drop(state);
            panic!("completion barrier underflow: done() called with no pending units");
        }
        state.pending -= 1;
        if state.pending == 0 {
            state.generation = state.generation.wrapping_add(1);
            self.inner.drained.notify_all();
        }
    }

    /// Block until every registered unit has called `done`.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        if state.pending == 0 {
            return;
        }
        let generation = state.generation;
        while state.generation == generation {
            self.inner.drained.wait(&mut state);
        }
    }

    /// Current number of outstanding units.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending
    }
}

impl Default for CompletionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionBarrier")
            .field("pending", &self.pending())
            .finish()
    }
}
