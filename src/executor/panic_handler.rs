use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{error, warn};

/// What to do when a unit body panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanicStrategy {
    /// Log and abort the process.
    Abort,
    /// Record the failure silently.
    Isolate,
    /// Record the failure and log it.
    #[default]
    LogAndContinue,
}

#[derive(Debug)]
pub struct PanicHandler {
    strategy: PanicStrategy,
    panic_count: AtomicUsize,
}

impl PanicHandler {
    pub fn new(strategy: PanicStrategy) -> Self {
        Self {
            strategy,
            panic_count: AtomicUsize::new(0),
        }
    }

    /// Turn a caught panic payload into a [`PanicInfo`], applying the strategy.
    pub fn capture(
        &self,
        unit: impl std::fmt::Display,
        payload: Box<dyn Any + Send>,
    ) -> PanicInfo {
        self.panic_count.fetch_add(1, Ordering::Relaxed);

        let panic_info = PanicInfo::from_payload(payload);

        match self.strategy {
            PanicStrategy::Abort => {
                error!(
                    unit = %unit,
                    message = %panic_info.message,
                    "unit panicked (abort strategy)"
                );
                std::process::abort();
            }
            PanicStrategy::Isolate => {}
            PanicStrategy::LogAndContinue => {
                warn!(unit = %unit, message = %panic_info.message, "unit panicked");
            }
        }

        panic_info
    }

    pub fn panic_count(&self) -> usize {
        self.panic_count.load(Ordering::Relaxed)
    }

    pub fn strategy(&self) -> PanicStrategy {
        self.strategy
    }
}

impl Default for PanicHandler {
    fn default() -> Self {
        Self::new(PanicStrategy::default())
    }
}

#[derive(Debug, Clone)]
pub struct PanicInfo {
    pub message: String,
}

impl PanicInfo {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        Self { message }
    }
}
