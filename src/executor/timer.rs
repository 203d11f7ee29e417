//! Deadline timer for parked units.
//!
//! A single background thread keeps a min-heap of deadlines and wakes each
//! sleeping task when its deadline passes. Parked tasks are held here, not on a
//! worker, so a blocking unit never occupies a worker thread while it waits.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

// Roughly thirty years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

struct Entry {
    deadline: Instant,
    seq: u64,
    waker: Waker,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // reversed so the BinaryHeap pops the earliest deadline first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    changed: Condvar,
}

impl TimerShared {
    fn register(&self, deadline: Instant, waker: Waker) {
        let mut state = self.state.lock();
        if state.shutdown {
            // Nobody will fire it; let the task observe the deadline itself.
            drop(state);
            waker.wake();
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        let earliest = state.heap.peek().map_or(true, |e| deadline < e.deadline);
        state.heap.push(Entry {
            deadline,
            seq,
            waker,
        });
        if earliest {
            self.changed.notify_one();
        }
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                break;
            }

            let now = Instant::now();
            let mut due = Vec::new();
            while let Some(entry) = state.heap.peek() {
                if entry.deadline > now {
                    break;
                }
                if let Some(entry) = state.heap.pop() {
                    due.push(entry.waker);
                }
            }

            if !due.is_empty() {
                drop(state);
                for waker in due {
                    waker.wake();
                }
                state = self.state.lock();
                continue;
            }

            match state.heap.peek().map(|e| e.deadline) {
                Some(deadline) => {
                    self.changed.wait_until(&mut state, deadline);
                }
                None => self.changed.wait(&mut state),
            }
        }

        let pending = state.heap.len();
        state.heap.clear();
        if pending > 0 {
            debug!(pending, "timer shut down with parked tasks");
        }
    }
}

/// Owner of the timer thread. Dropping it stops the thread.
pub struct Timer {
    shared: Arc<TimerShared>,
    thread: Option<JoinHandle<()>>,
}

impl Timer {
    pub fn new(thread_name: String) -> Result<Self> {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            changed: Condvar::new(),
        });

        let worker = shared.clone();
        let thread = thread::Builder::new()
            .name(thread_name)
            .spawn(move || worker.run())
            .map_err(|e| Error::executor(format!("timer spawn failed: {}", e)))?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> TimerHandle {
        TimerHandle {
            shared: self.shared.clone(),
        }
    }

    /// Number of tasks currently parked.
    pub fn parked(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
        }
        self.shared.changed.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable handle used by unit contexts to create sleeps.
#[derive(Clone)]
pub struct TimerHandle {
    shared: Arc<TimerShared>,
}

impl TimerHandle {
    pub fn sleep(&self, duration: Duration) -> Sleep {
        let now = Instant::now();
        // Durations past the representable range park for a very long time instead.
        let deadline = now
            .checked_add(duration)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Sleep {
            deadline,
            shared: self.shared.clone(),
        }
    }
}

/// Future that completes once its deadline has passed.
pub struct Sleep {
    deadline: Instant,
    shared: Arc<TimerShared>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if Instant::now() >= self.deadline {
            return Poll::Ready(());
        }
        // A spurious re-poll before the deadline registers again; an extra
        // wake-up is harmless.
        self.shared.register(self.deadline, cx.waker().clone());
        Poll::Pending
    }
}
