//! Fan-out of work units onto the pool.
//!
//! [`TaskLauncher::launch`] registers the whole wave on a [`CompletionBarrier`]
//! before spawning anything, then gives every unit a barrier slot that is
//! released exactly once on every exit path: normal return, error, panic, or
//! the task being dropped unfinished.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::{CpuPool, PanicHandler};
use crate::sync::CompletionBarrier;
use crate::trace::{EventKind, ExitOutcome, TraceRecorder};
use crate::unit::{UnitContext, UnitError, UnitId, UnitKind, WorkUnit};
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A unit whose body failed, reported once the wave has joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub unit: UnitId,
    pub kind: UnitKind,
    pub error: UnitError,
}

// Holds one barrier registration; releasing it is tied to drop.
struct BarrierSlot {
    barrier: CompletionBarrier,
}

impl Drop for BarrierSlot {
    fn drop(&mut self) {
        self.barrier.done();
    }
}

#[derive(Default)]
struct WaveState {
    completed: AtomicUsize,
    failures: Mutex<Vec<UnitFailure>>,
}

impl WaveState {
    fn finish(&self, unit: UnitId, kind: UnitKind, error: Option<UnitError>) {
        if let Some(error) = error {
            self.failures.lock().push(UnitFailure { unit, kind, error });
        }
        self.completed.fetch_add(1, Ordering::AcqRel);
    }
}

/// Spawns waves of units onto a pool.
pub struct TaskLauncher {
    pool: Arc<CpuPool>,
    recorder: Option<Arc<TraceRecorder>>,
    panic_handler: Arc<PanicHandler>,
    preempt_every: u64,
    block_delay: Duration,
}

impl TaskLauncher {
    pub fn new(pool: Arc<CpuPool>, config: &Config) -> Self {
        Self {
            pool,
            recorder: None,
            panic_handler: Arc::new(PanicHandler::new(config.panic_strategy)),
            preempt_every: config.preempt_every,
            block_delay: config.block_delay,
        }
    }

    /// Record scheduling events into `recorder` whenever it has an active session.
    pub fn with_recorder(mut self, recorder: Arc<TraceRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub(crate) fn with_panic_handler(mut self, handler: Arc<PanicHandler>) -> Self {
        self.panic_handler = handler;
        self
    }

    pub fn panic_handler(&self) -> &PanicHandler {
        &self.panic_handler
    }

    /// Register `units` on `barrier` and spawn them. Does not wait.
    pub fn launch(&self, units: Vec<WorkUnit>, barrier: &CompletionBarrier) -> Wave {
        let launched = units.len();
        let started = Instant::now();
        let state = Arc::new(WaveState::default());
        barrier.add(launched);

        for unit in units {
            let id = unit.id();
            let kind = unit.kind();
            let slot = BarrierSlot {
                barrier: barrier.clone(),
            };
            let cx = UnitContext::new(
                id,
                kind,
                self.preempt_every,
                self.block_delay,
                self.pool.timer(),
                self.recorder.clone(),
            );

            if let Some(recorder) = &self.recorder {
                recorder.record(EventKind::Spawn, id, kind);
            }

            let state = state.clone();
            let recorder = self.recorder.clone();
            let panic_handler = self.panic_handler.clone();

            self.pool.spawn(id, async move {
                // Declared first so it is released after the outcome is stored.
                let _slot = slot;

                let outcome = AssertUnwindSafe(async move { unit.run(cx).await })
                    .catch_unwind()
                    .await;

                let (exit, error) = match outcome {
                    Ok(Ok(())) => (ExitOutcome::Ok, None),
                    Ok(Err(e)) => (ExitOutcome::Error, Some(e)),
                    Err(payload) => {
                        let info = panic_handler.capture(id, payload);
                        (ExitOutcome::Panic, Some(UnitError::Panicked(info.message)))
                    }
                };

                if let Some(recorder) = &recorder {
                    recorder.record_exit(id, kind, exit);
                }
                state.finish(id, kind, error);
            });
        }

        Wave {
            barrier: barrier.clone(),
            state,
            launched,
            started,
        }
    }
}

/// Handle on a launched wave.
pub struct Wave {
    barrier: CompletionBarrier,
    state: Arc<WaveState>,
    launched: usize,
    started: Instant,
}

impl Wave {
    pub fn launched(&self) -> usize {
        self.launched
    }

    /// Block on the barrier, then report how the wave went.
    pub fn wait(self) -> WaveReport {
        self.barrier.wait();
        WaveReport {
            launched: self.launched,
            completed: self.state.completed.load(Ordering::Acquire),
            failures: std::mem::take(&mut *self.state.failures.lock()),
            elapsed: self.started.elapsed(),
        }
    }

    /// Failures seen so far. Only complete once the barrier has released.
    pub fn failures(&self) -> Vec<UnitFailure> {
        self.state.failures.lock().clone()
    }
}

impl std::fmt::Debug for Wave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wave")
            .field("launched", &self.launched)
            .field("completed", &self.state.completed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Outcome of a joined wave.
#[derive(Debug, Clone)]
pub struct WaveReport {
    pub launched: usize,
    /// Units whose body ran to an end (successfully or not).
    pub completed: usize,
    pub failures: Vec<UnitFailure>,
    pub elapsed: Duration,
}

impl WaveReport {
    /// Units that failed or never finished.
    pub fn failed(&self) -> usize {
        self.failures.len() + self.launched.saturating_sub(self.completed)
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn into_result(self) -> Result<WaveReport> {
        match self.failed() {
            0 => Ok(self),
            n => Err(Error::UnitsFailed(n)),
        }
    }
}
