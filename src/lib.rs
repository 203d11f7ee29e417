//! fanjoin - fan-out/join coordination with scheduler tracing
//!
//! Launch a wave of independent work units onto a worker pool, block until
//! every one of them has finished, and optionally record what the scheduler
//! did with them (spawns, parks, wake-ups, preemption points, exits) to a
//! trace artifact for offline inspection.
//!
//! # Quick Start
//!
//! ```no_run
//! use fanjoin::prelude::*;
//! use std::time::Duration;
//!
//! let rt = Runtime::new(Config::default()).unwrap();
//! let barrier = CompletionBarrier::new();
//!
//! let units = vec![
//!     fanjoin::workload::compute_bound(0, 3_000_000),
//!     fanjoin::workload::blocking(1, Duration::from_millis(300)),
//! ];
//!
//! let guard = rt.recorder().start("trace.out").unwrap();
//! let report = rt.launcher().launch(units, &barrier).wait();
//! guard.finish().unwrap();
//!
//! assert!(report.is_success());
//! ```
//!
//! # Components
//!
//! - **CompletionBarrier**: counts outstanding units; `wait` blocks until zero
//! - **WorkUnit**: an opaque async or sync body tagged compute or blocking
//! - **TaskLauncher**: registers a wave on a barrier and spawns it
//! - **TraceRecorder**: start/stop session writing an NDJSON event log

pub mod config;
pub mod error;
pub mod executor;
pub mod launcher;
pub mod prelude;
pub mod runtime;
pub mod sync;
pub mod trace;
pub mod unit;
pub mod workload;

// Re-export key types at crate root
pub use config::{Config, ConfigBuilder};
pub use error::{Error, Result};
pub use launcher::{TaskLauncher, UnitFailure, Wave, WaveReport};
pub use runtime::Runtime;
pub use sync::CompletionBarrier;
pub use trace::{TraceGuard, TraceRecorder};
pub use unit::{UnitContext, UnitError, UnitId, UnitKind, UnitResult, WorkUnit};

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_hello_wave() {
        let rt = Runtime::new(Config::builder().num_threads(4).build().unwrap()).unwrap();
        let seen = Arc::new(Mutex::new(vec![0usize; 11]));

        let units = (0..=10)
            .map(|i| {
                let seen = seen.clone();
                WorkUnit::from_fn(i, UnitKind::Compute, move |cx| {
                    seen.lock()[cx.id().0] += 1;
                    Ok(())
                })
            })
            .collect();

        let report = rt.run(units);

        assert!(report.is_success());
        assert_eq!(*seen.lock(), vec![1; 11]);
    }
}
