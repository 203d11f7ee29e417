use crate::config::Config;
use crate::error::Result;
use crate::executor::{CpuPool, PanicHandler};
use crate::launcher::{TaskLauncher, WaveReport};
use crate::sync::CompletionBarrier;
use crate::trace::TraceRecorder;
use crate::unit::WorkUnit;
use std::sync::Arc;

/// Worker pool plus the recorder its launches report to.
pub struct Runtime {
    pub(crate) pool: Arc<CpuPool>,
    recorder: Arc<TraceRecorder>,
    panic_handler: Arc<PanicHandler>,
    config: Config,
}

impl Runtime {
    /// Runtime with its own recorder.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_recorder(config, Arc::new(TraceRecorder::new()))
    }

    /// Runtime that reports scheduling events to `recorder`, e.g.
    /// [`TraceRecorder::global`].
    pub fn with_recorder(config: Config, recorder: Arc<TraceRecorder>) -> Result<Self> {
        config.validate()?;

        let pool = CpuPool::new(&config)?;

        Ok(Self {
            pool: Arc::new(pool),
            recorder,
            panic_handler: Arc::new(PanicHandler::new(config.panic_strategy)),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn recorder(&self) -> &Arc<TraceRecorder> {
        &self.recorder
    }

    pub fn num_threads(&self) -> usize {
        self.pool.num_threads()
    }

    /// Panics caught across every launch made through this runtime.
    pub fn panic_count(&self) -> usize {
        self.panic_handler.panic_count()
    }

    pub fn launcher(&self) -> TaskLauncher {
        TaskLauncher::new(self.pool.clone(), &self.config)
            .with_recorder(self.recorder.clone())
            .with_panic_handler(self.panic_handler.clone())
    }

    /// Launch `units` on a fresh barrier and wait for all of them.
    pub fn run(&self, units: Vec<WorkUnit>) -> WaveReport {
        let barrier = CompletionBarrier::new();
        self.launcher().launch(units, &barrier).wait()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("num_threads", &self.pool.num_threads())
            .field("recorder", &self.recorder)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{UnitKind, UnitError};

    #[test]
    fn test_custom_config() {
        let config = Config::builder().num_threads(2).build().unwrap();
        let rt = Runtime::new(config).unwrap();
        assert_eq!(rt.num_threads(), 2);
        assert!(!rt.recorder().is_active());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.num_threads = Some(0);
        assert!(Runtime::new(config).is_err());
    }

    #[test]
    fn test_run_counts_panics_across_launches() {
        let config = Config::builder()
            .num_threads(2)
            .panic_strategy(crate::executor::PanicStrategy::Isolate)
            .build()
            .unwrap();
        let rt = Runtime::new(config).unwrap();

        for _ in 0..2 {
            let report = rt.run(vec![
                WorkUnit::from_fn(0, UnitKind::Compute, |_| panic!("first")),
                WorkUnit::from_fn(1, UnitKind::Compute, |_| Err(UnitError::failed("second"))),
                WorkUnit::from_fn(2, UnitKind::Compute, |_| Ok(())),
            ]);
            assert_eq!(report.failed(), 2);
        }

        assert_eq!(rt.panic_count(), 2);
    }

    #[test]
    fn test_configured_block_delay_reaches_units() {
        use rand::SeedableRng;

        let config = Config::builder()
            .num_threads(1)
            .block_delay(std::time::Duration::from_millis(10))
            .build()
            .unwrap();
        let rt = Runtime::new(config).unwrap();
        let mut rng = rand_pcg::Pcg64::seed_from_u64(3);

        let report = rt.run(crate::workload::mixed_wave(0, 2, None, &mut rng));

        assert!(report.is_success());
        assert!(report.elapsed >= std::time::Duration::from_millis(10));
        assert!(
            report.elapsed < std::time::Duration::from_millis(200),
            "parked for {:?}",
            report.elapsed
        );
    }
}
