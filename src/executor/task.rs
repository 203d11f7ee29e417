//! Task representation and wake-up plumbing.

use super::cpu_pool::PoolShared;
use crate::unit::UnitId;
use futures::future::BoxFuture;
use futures::task::ArcWake;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// A unit's future plus what is needed to requeue it when woken.
pub(crate) struct Task {
    pub(crate) unit: UnitId,
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    // Set while the task sits in the queue so repeated wakes enqueue it once.
    scheduled: AtomicBool,
    pool: Weak<PoolShared>,
}

impl Task {
    pub(crate) fn new(
        unit: UnitId,
        future: BoxFuture<'static, ()>,
        pool: Weak<PoolShared>,
    ) -> Arc<Self> {
        Arc::new(Task {
            unit,
            future: Mutex::new(Some(future)),
            scheduled: AtomicBool::new(true),
            pool,
        })
    }

    /// Poll the future once.
    ///
    /// A panic escaping the future is caught here and the future is dropped.
    pub(crate) fn poll(self: &Arc<Self>) -> PollOutcome {
        self.scheduled.store(false, Ordering::Release);

        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            return PollOutcome::Stale;
        };

        let waker = futures::task::waker_ref(self);
        let mut cx = std::task::Context::from_waker(&waker);
        let result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| future.poll_unpin(&mut cx)));

        match result {
            Ok(std::task::Poll::Ready(())) => {
                *slot = None;
                PollOutcome::Finished
            }
            Ok(std::task::Poll::Pending) => PollOutcome::Pending,
            Err(_) => {
                *slot = None;
                PollOutcome::Panicked
            }
        }
    }
}

/// Result of polling a task once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    Pending,
    Finished,
    Panicked,
    // Woken after it already finished; nothing to do.
    Stale,
}

impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if arc_self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(pool) = arc_self.pool.upgrade() {
            pool.push(arc_self.clone());
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("unit", &self.unit)
            .field("scheduled", &self.scheduled.load(Ordering::Relaxed))
            .finish()
    }
}
