//! Pool configuration
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls (e.g. CLI flags applied by the daemon)
//! 2. Environment variables
//! 3. Library defaults
//!
//! | Variable                       | Default                       |
//! |--------------------------------|-------------------------------|
//! | `CTXPOOL_NUM_CONTEXTS`         | available parallelism / 3, ≥1 |
//! | `CTXPOOL_WAIT_MODE`            | `blocking`                    |
//! | `CTXPOOL_BLOCK_CACHE_CAPACITY` | 1024                          |
//!
//! Unlike lenient knobs, a set-but-unparsable variable here is an error:
//! a typo in the wait mode must not silently select another discipline.
//!
//! ```rust,ignore
//! let config = PoolConfig::from_env()?
//!     .num_contexts(4)
//!     .wait_mode(WaitMode::Yielding);
//! let pool = ContextPool::from_config(&config, factory)?;
//! ```

use std::thread;

use ctxpool_core::env::env_parse;
use ctxpool_core::{ConfigError, WaitMode};

pub mod defaults {
    use ctxpool_core::WaitMode;

    pub const WAIT_MODE: WaitMode = WaitMode::Blocking;
    pub const BLOCK_CACHE_CAPACITY: usize = crate::cache::DEFAULT_BLOCK_CACHE_CAPACITY;
    /// Upper bound on contexts; each one costs one or two OS threads.
    pub const MAX_CONTEXTS: usize = 1024;

    /// One context per three hardware threads, at least one.
    pub fn num_contexts() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get() / 3)
            .unwrap_or(1)
            .max(1)
    }
}

pub const ENV_NUM_CONTEXTS: &str = "CTXPOOL_NUM_CONTEXTS";
pub const ENV_WAIT_MODE: &str = "CTXPOOL_WAIT_MODE";
pub const ENV_BLOCK_CACHE_CAPACITY: &str = "CTXPOOL_BLOCK_CACHE_CAPACITY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of execution contexts (and worker threads)
    pub num_contexts: usize,
    /// Loop discipline shared by every context
    pub wait_mode: WaitMode,
    /// Entries in the shared block cache
    pub block_cache_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolConfig {
    /// Library defaults, ignoring the environment.
    pub fn new() -> Self {
        Self {
            num_contexts: defaults::num_contexts(),
            wait_mode: defaults::WAIT_MODE,
            block_cache_capacity: defaults::BLOCK_CACHE_CAPACITY,
        }
    }

    /// Library defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new();
        if let Some(n) = env_parse(ENV_NUM_CONTEXTS)? {
            config.num_contexts = n;
        }
        if let Some(mode) = env_parse(ENV_WAIT_MODE)? {
            config.wait_mode = mode;
        }
        if let Some(capacity) = env_parse(ENV_BLOCK_CACHE_CAPACITY)? {
            config.block_cache_capacity = capacity;
        }
        Ok(config)
    }

    pub fn num_contexts(mut self, n: usize) -> Self {
        self.num_contexts = n;
        self
    }

    pub fn wait_mode(mut self, mode: WaitMode) -> Self {
        self.wait_mode = mode;
        self
    }

    pub fn block_cache_capacity(mut self, capacity: usize) -> Self {
        self.block_cache_capacity = capacity;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_contexts == 0 {
            return Err(ConfigError::InvalidValue("num_contexts must be > 0"));
        }
        if self.num_contexts > defaults::MAX_CONTEXTS {
            return Err(ConfigError::InvalidValue("num_contexts must be <= 1024"));
        }
        if self.block_cache_capacity == 0 {
            return Err(ConfigError::InvalidValue("block_cache_capacity must be > 0"));
        }
        Ok(())
    }

    /// Threads the pool will run: one per context, two in blocking mode.
    pub fn thread_count(&self) -> usize {
        if self.wait_mode.is_cooperative() {
            self.num_contexts
        } else {
            self.num_contexts * 2
        }
    }

    /// Hardware threads seen by the process.
    pub fn available_parallelism() -> usize {
        thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }
}

impl std::fmt::Display for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "contexts={} wait_mode={} block_cache_capacity={}",
            self.num_contexts, self.wait_mode, self.block_cache_capacity
        )
    }
}
