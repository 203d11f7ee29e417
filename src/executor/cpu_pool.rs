use super::task::Task;
use super::timer::{Timer, TimerHandle};
use super::worker::{Worker, WorkerId, WorkerState};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::unit::UnitId;
use crossbeam_deque::{Injector, Steal};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// State shared between the pool handle, its workers, and task wakers.
pub(crate) struct PoolShared {
    injector: Injector<Arc<Task>>,
    unparkers: OnceLock<Vec<thread::Thread>>,
    next_unpark: AtomicUsize,
    shutdown: AtomicBool,
    live_tasks: AtomicUsize,
}

impl PoolShared {
    pub(crate) fn push(&self, task: Arc<Task>) {
        self.injector.push(task);
        self.unpark_one();
    }

    pub(crate) fn pop(&self) -> Option<Arc<Task>> {
        loop {
            match self.injector.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    pub(crate) fn task_finished(&self) {
        self.live_tasks.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn unpark_one(&self) {
        if let Some(threads) = self.unparkers.get() {
            if threads.is_empty() {
                return;
            }
            let idx = self.next_unpark.fetch_add(1, Ordering::Relaxed) % threads.len();
            threads[idx].unpark();
        }
    }

    fn unpark_all(&self) {
        if let Some(threads) = self.unparkers.get() {
            for thread in threads {
                thread.unpark();
            }
        }
    }
}

/// Fixed set of worker threads that multiplex unit futures off one shared
/// FIFO queue, plus the timer thread that holds parked units.
pub struct CpuPool {
    shared: Arc<PoolShared>,
    workers: Vec<WorkerHandle>,
    num_threads: usize,
    // Dropped after the workers have been joined.
    timer: Timer,
}

struct WorkerHandle {
    id: WorkerId,
    thread: Option<JoinHandle<()>>,
    state: Arc<WorkerState>,
}

impl CpuPool {
    pub fn new(config: &Config) -> Result<Self> {
        let num_threads = config.worker_threads();
        if num_threads == 0 {
            return Err(Error::config("need at least 1 thread"));
        }

        let shared = Arc::new(PoolShared {
            injector: Injector::new(),
            unparkers: OnceLock::new(),
            next_unpark: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            live_tasks: AtomicUsize::new(0),
        });

        let timer = Timer::new(format!("{}-timer", config.thread_name_prefix))?;

        let mut workers: Vec<WorkerHandle> = Vec::with_capacity(num_threads);
        let mut unparkers = Vec::with_capacity(num_threads);

        for id in 0..num_threads {
            let worker = Worker::new(id);
            let state = worker.state.clone();
            let shared_clone = shared.clone();
            let name = format!("{}-{}", config.thread_name_prefix, id);

            let mut builder = thread::Builder::new().name(name);

            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let spawned = builder.spawn(move || worker.run(shared_clone));
            let thread = match spawned {
                Ok(thread) => thread,
                Err(e) => {
                    // Workers already running must not outlive the failed pool.
                    shared.shutdown.store(true, Ordering::Release);
                    for handle in workers.iter_mut() {
                        if let Some(thread) = handle.thread.take() {
                            thread.thread().unpark();
                            let _ = thread.join();
                        }
                    }
                    return Err(Error::executor(format!("spawn failed: {}", e)));
                }
            };

            unparkers.push(thread.thread().clone());
            workers.push(WorkerHandle {
                id,
                thread: Some(thread),
                state,
            });
        }

        let _ = shared.unparkers.set(unparkers);
        debug!(workers = num_threads, "worker pool started");

        Ok(Self {
            shared,
            workers,
            num_threads,
            timer,
        })
    }

    /// Queue a future for execution. The task for `unit` is dropped unpolled
    /// if the pool is already shutting down.
    pub fn spawn<F>(&self, unit: UnitId, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shared.is_shutdown() {
            warn!(unit = %unit, "spawn after pool shutdown; dropping task");
            return;
        }
        let task = Task::new(unit, Box::pin(future), Arc::downgrade(&self.shared));
        self.shared.live_tasks.fetch_add(1, Ordering::AcqRel);
        self.shared.push(task);
    }

    pub fn timer(&self) -> TimerHandle {
        self.timer.handle()
    }

    /// Tasks spawned and not yet finished, including parked ones.
    pub fn live_tasks(&self) -> usize {
        self.shared.live_tasks.load(Ordering::Acquire)
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Total polls performed by each worker, indexed by worker id.
    pub fn polls_per_worker(&self) -> Vec<u64> {
        let mut polls = vec![0; self.num_threads];
        for worker in &self.workers {
            polls[worker.id] = worker.state.polls.load(Ordering::Relaxed);
        }
        polls
    }

    pub fn shutdown(&mut self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        // wake everyone up to check shutdown flag
        self.shared.unpark_all();

        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }

        let mut dropped = 0usize;
        while self.shared.pop().is_some() {
            dropped += 1;
        }
        debug!(dropped, "worker pool stopped");
    }
}

impl Drop for CpuPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
