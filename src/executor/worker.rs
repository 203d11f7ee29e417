// worker thread stuff
use super::cpu_pool::PoolShared;
use super::task::{PollOutcome, Task};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;

pub type WorkerId = usize;

thread_local! {
    static CURRENT_WORKER: Cell<Option<WorkerId>> = const { Cell::new(None) };
}

/// Index of the pool worker running on this thread, if any.
pub fn current_worker() -> Option<WorkerId> {
    CURRENT_WORKER.with(|w| w.get())
}

// stats for each worker
#[derive(Debug, Default)]
pub struct WorkerState {
    pub polls: AtomicU64,
}

pub(crate) struct Worker {
    pub id: WorkerId,
    pub state: Arc<WorkerState>,
}

impl Worker {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            state: Arc::new(WorkerState::default()),
        }
    }

    // main loop
    pub fn run(&self, shared: Arc<PoolShared>) {
        CURRENT_WORKER.with(|w| w.set(Some(self.id)));
        let mut backoff_cnt = 0;

        loop {
            if shared.is_shutdown() {
                break;
            }

            if let Some(task) = shared.pop() {
                backoff_cnt = 0;
                if self.execute_task(&task) {
                    shared.task_finished();
                }
            } else {
                self.backoff(&mut backoff_cnt);
            }
        }

        CURRENT_WORKER.with(|w| w.set(None));
    }

    fn execute_task(&self, task: &Arc<Task>) -> bool {
        self.state.polls.fetch_add(1, Ordering::Relaxed);

        match task.poll() {
            PollOutcome::Pending | PollOutcome::Stale => false,
            PollOutcome::Finished => true,
            PollOutcome::Panicked => {
                warn!(unit = %task.unit, "task panicked outside its unit body");
                true
            }
        }
    }

    fn backoff(&self, count: &mut u32) {
        const MAX_SPINS: u32 = 10;
        const MAX_YIELDS: u32 = 20;

        *count += 1;

        if *count <= MAX_SPINS {
            let spins = (*count).min(6);
            for _ in 0..(1 << spins) {
                std::hint::spin_loop();
            }
        } else if *count <= MAX_YIELDS {
            thread::yield_now();
        } else {
            thread::park_timeout(Duration::from_micros(500));
        }
    }
}
