use crate::error::{Error, Result};
use crate::executor::PanicStrategy;
use std::time::Duration;

/// Environment variable consulted by [`Config::from_env`] for the worker count.
pub const THREADS_ENV: &str = "FANJOIN_THREADS";

/// Iterations between preemption points in compute-bound units.
pub const DEFAULT_PREEMPT_EVERY: u64 = 500_000;

/// How long a blocking unit stays parked.
pub const DEFAULT_BLOCK_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub struct Config {
    pub num_threads: Option<usize>,
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,
    pub panic_strategy: PanicStrategy,
    pub preempt_every: u64,
    pub block_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: None,
            stack_size: Some(2 * 1024 * 1024),
            thread_name_prefix: "fanjoin-worker".to_string(),
            panic_strategy: PanicStrategy::default(),
            preempt_every: DEFAULT_PREEMPT_EVERY,
            block_delay: DEFAULT_BLOCK_DELAY,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Default config with the parallelism hint from `FANJOIN_THREADS` applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        if let Ok(raw) = std::env::var(THREADS_ENV) {
            let n = raw.trim().parse::<usize>().map_err(|_| {
                Error::config(format!("{} must be an integer, got {:?}", THREADS_ENV, raw))
            })?;
            config.num_threads = Some(n);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.num_threads {
            if n == 0 {
                return Err(Error::config("num_threads must be > 0"));
            }
            if n > 1024 {
                return Err(Error::config("num_threads too large (max 1024)"));
            }
        }

        if self.preempt_every == 0 {
            return Err(Error::config("preempt_every must be > 0"));
        }

        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }

        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get)
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn num_threads(mut self, n: usize) -> Self {
        self.config.num_threads = Some(n);
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.config.panic_strategy = strategy;
        self
    }

    pub fn preempt_every(mut self, iterations: u64) -> Self {
        self.config.preempt_every = iterations;
        self
    }

    pub fn block_delay(mut self, delay: Duration) -> Self {
        self.config.block_delay = delay;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::default().worker_threads() >= 1);
    }

    #[test]
    fn test_builder_rejects_zero_threads() {
        let result = Config::builder().num_threads(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_rejects_zero_preempt_interval() {
        let result = Config::builder().preempt_every(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_overrides() {
        let config = Config::builder()
            .num_threads(4)
            .block_delay(Duration::from_millis(10))
            .thread_name_prefix("test-worker")
            .build()
            .unwrap();

        assert_eq!(config.worker_threads(), 4);
        assert_eq!(config.block_delay, Duration::from_millis(10));
        assert_eq!(config.thread_name_prefix, "test-worker");
    }

    // Serializes tests that touch the process environment.
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    fn with_threads_env<T>(value: Option<&str>, f: impl FnOnce() -> T) -> T {
        let _lock = ENV_LOCK.lock();
        match value {
            Some(v) => std::env::set_var(THREADS_ENV, v),
            None => std::env::remove_var(THREADS_ENV),
        }
        let result = f();
        std::env::remove_var(THREADS_ENV);
        result
    }

    #[test]
    fn test_from_env_without_hint_uses_host_cores() {
        let config = with_threads_env(None, Config::from_env).unwrap();
        assert_eq!(config.num_threads, None);
        assert_eq!(config.worker_threads(), num_cpus::get());
    }

    #[test]
    fn test_from_env_applies_thread_hint() {
        let config = with_threads_env(Some(" 3 "), Config::from_env).unwrap();
        assert_eq!(config.worker_threads(), 3);
    }

    #[test]
    fn test_from_env_rejects_non_integer() {
        let result = with_threads_env(Some("lots"), Config::from_env);
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains(THREADS_ENV)));
    }

    #[test]
    fn test_from_env_rejects_zero() {
        let result = with_threads_env(Some("0"), Config::from_env);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
